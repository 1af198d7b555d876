//! Prompt assembly for the SQL generation chain.

use crate::models::{ChatRole, ChatTurn, DbKind};

/// Substituted for the metadata block when nothing was retrieved.
pub const NO_METADATA_PLACEHOLDER: &str = "No additional context available.";

/// Only this many most recent turns are rendered into the prompt.
pub const HISTORY_WINDOW_TURNS: usize = 6;

/// System prompt: backend name, numbered rules, and the follow-up
/// instruction.
pub fn render_system(kind: DbKind, rules: &[&str]) -> String {
    let rules_text = rules
        .iter()
        .enumerate()
        .map(|(i, rule)| format!("{}. {}", i + 1, rule))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are an expert {kind} query generator that provides helpful explanations. \
         Generate queries based on the provided schema, context, and chat history.\n\n\
         Rules:\n{rules_text}\n\n\
         Do not explain the query, respond with the SQL query only.\n\n\
         For follow-up questions, use the chat history to maintain context and modify \
         previous queries appropriately."
    )
}

/// User prompt: schema context, metadata context, recent history, and
/// the question.
pub fn render_user(schema: &str, context: &str, history: &str, question: &str) -> String {
    format!(
        "Schema:\n{schema}\n\n\
         Additional Context:\n{context}\n\n\
         Recent Chat History:\n{history}\n\n\
         User Query: {question}\n\n\
         Generate the SQL query:"
    )
}

/// Render the trailing window of a conversation, one line per turn.
pub fn render_history(history: &[ChatTurn]) -> String {
    let start = history.len().saturating_sub(HISTORY_WINDOW_TURNS);
    history[start..]
        .iter()
        .map(|turn| match turn.role {
            ChatRole::User => format!("User: {}", turn.content),
            ChatRole::Assistant => format!("Assistant: {}", turn.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::derive_rules;

    #[test]
    fn test_system_prompt_names_backend_and_numbers_rules() {
        let rules = derive_rules("show all customers");
        let prompt = render_system(DbKind::Snowflake, &rules);

        assert!(prompt.contains("expert snowflake query generator"));
        assert!(prompt.contains("1. Use ONLY tables and columns from the schema"));
        assert!(prompt.contains("5. Handle NULL values appropriately"));
        assert!(!prompt.contains("6. "));
    }

    #[test]
    fn test_system_prompt_numbers_conditional_rules_after_base() {
        let rules = derive_rules("top 5 customers");
        let prompt = render_system(DbKind::Postgres, &rules);
        assert!(prompt.contains("6. Use ORDER BY with appropriate sorting direction (ASC/DESC)"));
    }

    #[test]
    fn test_user_prompt_layout() {
        let prompt = render_user("SCHEMA", "CTX", "HIST", "how many orders?");
        assert!(prompt.starts_with("Schema:\nSCHEMA\n\nAdditional Context:\nCTX\n\n"));
        assert!(prompt.contains("Recent Chat History:\nHIST\n\n"));
        assert!(prompt.contains("User Query: how many orders?"));
        assert!(prompt.ends_with("Generate the SQL query:"));
    }

    #[test]
    fn test_history_window_keeps_last_six_turns() {
        let history: Vec<ChatTurn> = (0..8)
            .map(|i| {
                if i % 2 == 0 {
                    ChatTurn::user(format!("q{}", i))
                } else {
                    ChatTurn::assistant(format!("a{}", i))
                }
            })
            .collect();

        let rendered = render_history(&history);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "User: q2");
        assert_eq!(lines[5], "Assistant: a7");
        assert!(!rendered.contains("q0"));
    }

    #[test]
    fn test_history_shorter_than_window_rendered_whole() {
        let history = vec![ChatTurn::user("first"), ChatTurn::assistant("SELECT 1")];
        assert_eq!(render_history(&history), "User: first\nAssistant: SELECT 1");
    }

    #[test]
    fn test_empty_history_renders_empty() {
        assert_eq!(render_history(&[]), "");
    }
}
