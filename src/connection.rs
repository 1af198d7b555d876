//! Warehouse connection contract.
//!
//! Every backend implements [`WarehouseConnection`]: a boolean liveness
//! probe, an `execute` that reports faults inside the result instead of
//! raising them, and schema introspection into the canonical document.
//! Connections hold credentials only; transport is opened per call.

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{DbKind, QueryOutcome, SchemaDoc};

/// Rows shown by [`format_results`] before eliding the rest.
pub const DISPLAY_ROW_CAP: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresCredentials {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

fn default_postgres_port() -> u16 {
    5432
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnowflakeCredentials {
    pub account: String,
    pub user: String,
    /// Programmatic access token, sent as a bearer credential.
    pub password: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabricksCredentials {
    pub server_hostname: String,
    pub http_path: String,
    pub access_token: String,
}

#[derive(Debug, Clone)]
pub enum WarehouseCredentials {
    Postgres(PostgresCredentials),
    Snowflake(SnowflakeCredentials),
    Databricks(DatabricksCredentials),
}

impl WarehouseCredentials {
    pub fn kind(&self) -> DbKind {
        match self {
            WarehouseCredentials::Postgres(_) => DbKind::Postgres,
            WarehouseCredentials::Snowflake(_) => DbKind::Snowflake,
            WarehouseCredentials::Databricks(_) => DbKind::Databricks,
        }
    }
}

#[async_trait]
pub trait WarehouseConnection: Send + Sync {
    fn kind(&self) -> DbKind;

    /// Liveness probe. Failures are reported on stderr, never raised.
    async fn test(&self) -> bool;

    /// Run one statement. Transport and SQL faults land in
    /// [`QueryOutcome::error`]; this never returns `Err`.
    async fn execute(&self, sql: &str) -> QueryOutcome;

    /// Read the warehouse catalog into the canonical schema document.
    async fn introspect(&self) -> anyhow::Result<SchemaDoc>;
}

/// Build a connection for the given credentials. No network traffic
/// happens here; the first probe or statement opens transport.
pub fn connect(credentials: WarehouseCredentials) -> Box<dyn WarehouseConnection> {
    match credentials {
        WarehouseCredentials::Postgres(creds) => {
            Box::new(crate::backend_postgres::PostgresConnection::new(creds))
        }
        WarehouseCredentials::Snowflake(creds) => {
            Box::new(crate::backend_snowflake::SnowflakeConnection::new(creds))
        }
        WarehouseCredentials::Databricks(creds) => {
            Box::new(crate::backend_databricks::DatabricksConnection::new(creds))
        }
    }
}

/// Render an outcome for display. Errors win over everything, empty
/// results get a fixed message, and listings are capped at
/// [`DISPLAY_ROW_CAP`] rows with an elision marker.
pub fn format_results(outcome: &QueryOutcome) -> String {
    if let Some(error) = &outcome.error {
        return format!("Error: {}", error);
    }

    if outcome.rows.is_empty() {
        return "No results found.".to_string();
    }

    let mut lines: Vec<String> = Vec::new();

    if let Some(columns) = &outcome.columns {
        let header = columns.join(" | ");
        let underline = "-".repeat(header.len());
        lines.push(header);
        lines.push(underline);
    }

    for row in outcome.rows.iter().take(DISPLAY_ROW_CAP) {
        lines.push(row.join(" | "));
    }

    if outcome.rows.len() > DISPLAY_ROW_CAP {
        lines.push(format!(
            "\n... and {} more rows",
            outcome.rows.len() - DISPLAY_ROW_CAP
        ));
    }

    lines.join("\n")
}

/// Decode one JSON result cell from a REST statement API. `None`
/// means SQL NULL.
pub(crate) fn json_cell(cell: &serde_json::Value) -> Option<String> {
    match cell {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Render decoded cells for display, turning NULLs into the literal
/// string shared by every backend.
pub(crate) fn render_cells(rows: Vec<Vec<Option<String>>>) -> Vec<Vec<String>> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| cell.unwrap_or_else(|| "NULL".to_string()))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_with_rows(n: usize) -> QueryOutcome {
        QueryOutcome::ok(
            Some(vec!["id".to_string(), "name".to_string()]),
            (0..n)
                .map(|i| vec![i.to_string(), format!("row{}", i)])
                .collect(),
        )
    }

    #[test]
    fn test_error_takes_precedence_over_rows() {
        let mut outcome = outcome_with_rows(3);
        outcome.error = Some("relation \"orders\" does not exist".to_string());
        assert_eq!(
            format_results(&outcome),
            "Error: relation \"orders\" does not exist"
        );
    }

    #[test]
    fn test_empty_result_message() {
        let outcome = QueryOutcome::ok(Some(vec!["id".to_string()]), vec![]);
        assert_eq!(format_results(&outcome), "No results found.");
    }

    #[test]
    fn test_header_underline_matches_header_length() {
        let formatted = format_results(&outcome_with_rows(2));
        let lines: Vec<&str> = formatted.lines().collect();
        assert_eq!(lines[0], "id | name");
        assert_eq!(lines[1], "---------");
        assert_eq!(lines[0].len(), lines[1].len());
        assert_eq!(lines[2], "0 | row0");
    }

    #[test]
    fn test_rows_without_column_names_have_no_header() {
        let outcome = QueryOutcome::ok(None, vec![vec!["1".to_string()]]);
        assert_eq!(format_results(&outcome), "1");
    }

    #[test]
    fn test_listing_caps_at_fifty_rows() {
        let formatted = format_results(&outcome_with_rows(75));
        let lines: Vec<&str> = formatted.split('\n').collect();

        // header + underline + 50 rows + blank + marker
        assert_eq!(lines.len(), 54);
        assert_eq!(lines[53], "... and 25 more rows");
        assert_eq!(lines[52], "");
        assert_eq!(lines[51], "49 | row49");
        assert!(!formatted.contains("row50"));
    }

    #[test]
    fn test_exactly_fifty_rows_not_elided() {
        let formatted = format_results(&outcome_with_rows(50));
        assert!(!formatted.contains("more rows"));
        assert!(formatted.contains("49 | row49"));
    }

    #[test]
    fn test_json_cell_decoding() {
        use serde_json::json;
        assert_eq!(json_cell(&json!(null)), None);
        assert_eq!(json_cell(&json!("text")), Some("text".to_string()));
        assert_eq!(json_cell(&json!(42)), Some("42".to_string()));
        assert_eq!(json_cell(&json!(true)), Some("true".to_string()));
    }

    #[test]
    fn test_render_cells_spells_out_nulls() {
        let rows = vec![vec![Some("1".to_string()), None]];
        assert_eq!(render_cells(rows), vec![vec!["1".to_string(), "NULL".to_string()]]);
    }
}
