//! SQL generation orchestration.
//!
//! Wires retrieval, rule derivation, prompt assembly, and the chat
//! model into one call. Faults never raise: the result is either SQL
//! text or an error string the caller can show as-is.

use crate::config::Config;
use crate::llm;
use crate::models::{ChatTurn, DbKind};
use crate::prompt;
use crate::rules::derive_rules;
use crate::store;

/// Returned when retrieval produced no schema context. Generation
/// stops before the model is ever called.
pub const NO_SCHEMA_ERROR: &str = "Error: No schema information available.";

const GENERATION_ERROR_PREFIX: &str = "Error generating query:";

/// Generate SQL for a question. `history` is the conversation so far;
/// only the trailing window is rendered into the prompt.
pub async fn generate_sql(
    config: &Config,
    question: &str,
    history: &[ChatTurn],
    kind: DbKind,
) -> String {
    let (schema_context, metadata_context) = store::retrieve_context(config, question).await;
    generate_sql_with_context(
        config,
        question,
        history,
        kind,
        &schema_context,
        &metadata_context,
    )
    .await
}

/// Generate from context the caller already retrieved. Callers that
/// display the context pass the same pair here, so the question is
/// embedded once and the shown context matches what generation used.
pub async fn generate_sql_with_context(
    config: &Config,
    question: &str,
    history: &[ChatTurn],
    kind: DbKind,
    schema_context: &str,
    metadata_context: &str,
) -> String {
    if schema_context.is_empty() {
        return NO_SCHEMA_ERROR.to_string();
    }

    let rules = derive_rules(question);
    let system = prompt::render_system(kind, &rules);

    let context = if metadata_context.is_empty() {
        prompt::NO_METADATA_PLACEHOLDER.to_string()
    } else {
        metadata_context.to_string()
    };
    let history_text = prompt::render_history(history);
    let user = prompt::render_user(schema_context, &context, &history_text, question);

    match llm::complete(&config.llm, &system, &user).await {
        Ok(sql) => sql,
        Err(e) => format!("{} {:#}", GENERATION_ERROR_PREFIX, e),
    }
}

/// Whether a generation result is one of the error strings rather
/// than SQL. Callers use this to decide what to record in history.
pub fn is_error_text(result: &str) -> bool {
    result == NO_SCHEMA_ERROR || result.starts_with(GENERATION_ERROR_PREFIX)
}
