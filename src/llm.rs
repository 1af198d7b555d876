//! Chat completion client for SQL generation.
//!
//! Same provider scheme and retry strategy as the embedding module:
//! OpenAI-compatible chat completions or an Ollama instance, selected
//! by `llm.provider`. Generation runs at the configured temperature,
//! zero by default so repeated questions produce the same SQL.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::LlmConfig;

/// Run one system + user exchange and return the assistant text.
pub async fn complete(config: &LlmConfig, system: &str, user: &str) -> Result<String> {
    match config.provider.as_str() {
        "openai" => complete_openai(config, system, user).await,
        "ollama" => complete_ollama(config, system, user).await,
        "disabled" => bail!("Completion provider is disabled"),
        other => bail!("Unknown llm provider: {}", other),
    }
}

async fn complete_openai(config: &LlmConfig, system: &str, user: &str) -> Result<String> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("llm.model required"))?;

    let base = config
        .url
        .as_deref()
        .unwrap_or("https://api.openai.com")
        .trim_end_matches('/');

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": user},
        ],
        "temperature": config.temperature,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/v1/chat/completions", base))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_chat_response(&json, "/choices/0/message/content");
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "OpenAI API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("OpenAI API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Completion failed after retries")))
}

async fn complete_ollama(config: &LlmConfig, system: &str, user: &str) -> Result<String> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("llm.model required"))?;

    let url = config
        .url
        .as_deref()
        .unwrap_or("http://localhost:11434")
        .trim_end_matches('/');

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system},
            {"role": "user", "content": user},
        ],
        "stream": false,
        "options": {"temperature": config.temperature},
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/api/chat", url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_chat_response(&json, "/message/content");
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Ollama API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("Ollama API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    url,
                    e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama completion failed after retries")))
}

fn parse_chat_response(json: &serde_json::Value, pointer: &str) -> Result<String> {
    json.pointer(pointer)
        .and_then(|content| content.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing message content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let config = LlmConfig::default();
        let err = complete(&config, "system", "user").await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn test_unknown_provider_errors() {
        let config = LlmConfig {
            provider: "psychic".to_string(),
            ..LlmConfig::default()
        };
        let err = complete(&config, "system", "user").await.unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_parse_openai_chat_shape() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "SELECT 1"}}]
        });
        let content = parse_chat_response(&json, "/choices/0/message/content").unwrap();
        assert_eq!(content, "SELECT 1");
    }

    #[test]
    fn test_parse_ollama_chat_shape() {
        let json = serde_json::json!({
            "message": {"role": "assistant", "content": "SELECT 2"}
        });
        let content = parse_chat_response(&json, "/message/content").unwrap();
        assert_eq!(content, "SELECT 2");
    }

    #[test]
    fn test_parse_rejects_missing_content() {
        let json = serde_json::json!({"choices": []});
        assert!(parse_chat_response(&json, "/choices/0/message/content").is_err());
    }
}
