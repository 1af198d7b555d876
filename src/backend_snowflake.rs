//! Snowflake backend.
//!
//! Talks to the SQL API v2 statements endpoint with a programmatic
//! access token. Transient submit failures (429, 5xx, network) are
//! retried with exponential backoff. Statements that outlive the
//! request timeout come back as 202 and are polled by handle until
//! they finish; an accepted statement is only ever polled, never
//! resubmitted.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

use crate::connection::{json_cell, render_cells, SnowflakeCredentials, WarehouseConnection};
use crate::models::{ColumnInfo, DbKind, KeyRole, QueryOutcome, SchemaDoc, TableInfo};

const STATEMENT_TIMEOUT_SECS: u64 = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLLS: u32 = 120;
const SUBMIT_RETRIES: u32 = 2;

type ResultSet = (Option<Vec<String>>, Vec<Vec<Option<String>>>);

pub struct SnowflakeConnection {
    creds: SnowflakeCredentials,
}

impl SnowflakeConnection {
    pub fn new(creds: SnowflakeCredentials) -> Self {
        Self { creds }
    }

    fn statements_url(&self) -> String {
        format!(
            "https://{}.snowflakecomputing.com/api/v2/statements",
            self.creds.account
        )
    }

    fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(STATEMENT_TIMEOUT_SECS + 10))
            .build()
            .context("Failed to build HTTP client")
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.creds.password)
            .header(
                "X-Snowflake-Authorization-Token-Type",
                "PROGRAMMATIC_ACCESS_TOKEN",
            )
            .header("User-Agent", concat!("nlsql/", env!("CARGO_PKG_VERSION")))
    }

    async fn submit(&self, sql: &str) -> Result<ResultSet> {
        let client = self.client()?;
        let body = serde_json::json!({
            "statement": sql,
            "timeout": STATEMENT_TIMEOUT_SECS,
            "database": self.creds.database,
            "schema": self.creds.schema,
            "warehouse": self.creds.warehouse,
        });

        let mut last_err = None;

        for attempt in 0..=SUBMIT_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .authorize(client.post(self.statements_url()))
                .json(&body)
                .send()
                .await;

            let response = match resp {
                Ok(response) => response,
                Err(e) => {
                    last_err = Some(anyhow::Error::new(e).context(format!(
                        "Failed to reach Snowflake account {}",
                        self.creds.account
                    )));
                    continue;
                }
            };

            let status = response.status();

            // Rate limited or server error — retry
            if status.as_u16() == 429 || status.is_server_error() {
                let body_text = response.text().await.unwrap_or_default();
                last_err = Some(anyhow!("Snowflake API error {}: {}", status, body_text));
                continue;
            }

            let payload: Value = response
                .json()
                .await
                .context("Invalid response from Snowflake")?;

            if status.as_u16() == 202 {
                let handle = payload
                    .get("statementHandle")
                    .and_then(|h| h.as_str())
                    .ok_or_else(|| anyhow!("Snowflake accepted the statement without a handle"))?
                    .to_string();
                return self.poll(&client, &handle).await;
            }

            // Client error (not 429) — don't retry
            if !status.is_success() {
                bail!("Snowflake API error {}: {}", status, api_message(&payload));
            }

            return parse_result_set(&payload);
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Snowflake submit failed after retries")))
    }

    async fn poll(&self, client: &reqwest::Client, handle: &str) -> Result<ResultSet> {
        let url = format!("{}/{}", self.statements_url(), handle);
        for _ in 0..MAX_POLLS {
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .authorize(client.get(&url))
                .send()
                .await
                .context("Failed to poll Snowflake statement status")?;
            let status = response.status();
            let payload: Value = response
                .json()
                .await
                .context("Invalid response from Snowflake")?;

            if status.as_u16() == 202 {
                continue;
            }
            if !status.is_success() {
                bail!("Snowflake API error {}: {}", status, api_message(&payload));
            }
            return parse_result_set(&payload);
        }
        bail!("Snowflake statement {} did not finish in time", handle)
    }

    /// Column names in the table's primary key, via SHOW PRIMARY KEYS.
    /// Degrades to an empty set when the command is not permitted.
    async fn primary_key_columns(&self, table: &str) -> HashSet<String> {
        let sql = format!(
            "SHOW PRIMARY KEYS IN TABLE {}.{}.{}",
            self.creds.database, self.creds.schema, table
        );
        match self.submit(&sql).await {
            Ok((columns, rows)) => {
                let idx = columns.as_ref().and_then(|cols| {
                    cols.iter()
                        .position(|name| name.eq_ignore_ascii_case("column_name"))
                });
                match idx {
                    Some(idx) => rows
                        .into_iter()
                        .filter_map(|mut row| {
                            if idx < row.len() {
                                row.swap_remove(idx)
                            } else {
                                None
                            }
                        })
                        .collect(),
                    None => HashSet::new(),
                }
            }
            Err(e) => {
                eprintln!("Warning: failed to read primary keys of {}: {:#}", table, e);
                HashSet::new()
            }
        }
    }

    async fn table_row_count(&self, table: &str) -> i64 {
        let sql = format!(
            "SELECT COUNT(*) FROM {}.{}.{}",
            self.creds.database, self.creds.schema, table
        );
        match self.submit(&sql).await {
            Ok((_, rows)) => rows
                .first()
                .and_then(|row| row.first())
                .and_then(|cell| cell.as_deref())
                .and_then(|text| text.parse().ok())
                .unwrap_or(0),
            Err(e) => {
                eprintln!("Warning: failed to count rows in {}: {:#}", table, e);
                0
            }
        }
    }
}

#[async_trait]
impl WarehouseConnection for SnowflakeConnection {
    fn kind(&self) -> DbKind {
        DbKind::Snowflake
    }

    async fn test(&self) -> bool {
        match self.submit("SELECT 1").await {
            Ok(_) => true,
            Err(e) => {
                eprintln!("Warning: Snowflake connection failed: {:#}", e);
                false
            }
        }
    }

    async fn execute(&self, sql: &str) -> QueryOutcome {
        match self.submit(sql).await {
            Ok((columns, rows)) => QueryOutcome::ok(columns, render_cells(rows)),
            Err(e) => QueryOutcome::failed(format!("{:#}", e)),
        }
    }

    async fn introspect(&self) -> Result<SchemaDoc> {
        let schema_lit = quote_literal(&self.creds.schema);
        let tables_sql = format!(
            "SELECT TABLE_NAME FROM {}.INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
            self.creds.database, schema_lit
        );
        let (_, table_rows) = self
            .submit(&tables_sql)
            .await
            .context("Failed to list Snowflake tables")?;
        let table_names: Vec<String> = table_rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect();

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            let columns_sql = format!(
                "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT \
                 FROM {}.INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' \
                 ORDER BY ORDINAL_POSITION",
                self.creds.database,
                schema_lit,
                quote_literal(&name)
            );
            let (_, column_rows) = self
                .submit(&columns_sql)
                .await
                .with_context(|| format!("Failed to introspect columns of {}", name))?;

            let primary_keys = self.primary_key_columns(&name).await;
            let row_count = self.table_row_count(&name).await;

            let columns = column_rows
                .into_iter()
                .map(|row| {
                    let mut cells = row.into_iter();
                    let column_name = cells.next().flatten().unwrap_or_default();
                    let data_type = cells.next().flatten().unwrap_or_default();
                    let is_nullable = cells.next().flatten().unwrap_or_default();
                    let default = cells.next().flatten();
                    let key_role = if primary_keys.contains(&column_name) {
                        Some(KeyRole::Primary)
                    } else {
                        None
                    };
                    ColumnInfo {
                        name: column_name,
                        data_type,
                        nullable: is_nullable.eq_ignore_ascii_case("YES"),
                        default,
                        max_length: None,
                        numeric_precision: None,
                        numeric_scale: None,
                        key_role,
                        references: None,
                    }
                })
                .collect();

            tables.push(TableInfo {
                name,
                row_count,
                columns,
            });
        }

        Ok(SchemaDoc::from_tables(tables))
    }
}

fn quote_literal(text: &str) -> String {
    text.replace('\'', "''")
}

fn api_message(payload: &Value) -> String {
    payload
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown error")
        .to_string()
}

/// Pull column names from resultSetMetaData.rowType and cells from the
/// data array. Either may be absent for statements without results.
fn parse_result_set(payload: &Value) -> Result<ResultSet> {
    let columns = payload
        .pointer("/resultSetMetaData/rowType")
        .and_then(|r| r.as_array())
        .map(|row_type| {
            row_type
                .iter()
                .filter_map(|col| col.get("name").and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

    let rows = payload
        .get("data")
        .and_then(|d| d.as_array())
        .map(|data| {
            data.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(json_cell).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default();

    Ok((columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result_set_reads_row_type_and_data() {
        let payload = serde_json::json!({
            "resultSetMetaData": {
                "rowType": [{"name": "ID"}, {"name": "NAME"}]
            },
            "data": [["1", "widget"], ["2", null]]
        });
        let (columns, rows) = parse_result_set(&payload).unwrap();
        assert_eq!(
            columns,
            Some(vec!["ID".to_string(), "NAME".to_string()])
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0].as_deref(), Some("2"));
        assert_eq!(rows[1][1], None);
    }

    #[test]
    fn test_parse_result_set_without_data() {
        let payload = serde_json::json!({"statementHandle": "abc"});
        let (columns, rows) = parse_result_set(&payload).unwrap();
        assert!(columns.is_none());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_quote_literal_doubles_quotes() {
        assert_eq!(quote_literal("o'brien"), "o''brien");
    }

    #[test]
    fn test_statements_url_uses_account() {
        let conn = SnowflakeConnection::new(SnowflakeCredentials {
            account: "acme-xy12345".to_string(),
            user: "svc".to_string(),
            password: "pat".to_string(),
            warehouse: "wh".to_string(),
            database: "db".to_string(),
            schema: "public".to_string(),
        });
        assert_eq!(
            conn.statements_url(),
            "https://acme-xy12345.snowflakecomputing.com/api/v2/statements"
        );
    }

    #[tokio::test]
    async fn test_submit_retries_unreachable_endpoint() {
        // Account chosen so the statements URL collapses to a closed
        // local port instead of a real Snowflake host.
        let conn = SnowflakeConnection::new(SnowflakeCredentials {
            account: "127.0.0.1:1/".to_string(),
            user: "svc".to_string(),
            password: "pat".to_string(),
            warehouse: "wh".to_string(),
            database: "db".to_string(),
            schema: "public".to_string(),
        });

        let started = std::time::Instant::now();
        let outcome = conn.execute("SELECT 1").await;
        let elapsed = started.elapsed();

        let error = outcome.error.expect("unreachable endpoint must fail");
        assert!(
            error.contains("Failed to reach Snowflake"),
            "unexpected error: {}",
            error
        );
        // The first backoff delay is 1s; returning faster means the
        // submit gave up on the first network error.
        assert!(
            elapsed >= Duration::from_secs(1),
            "submit returned after {:?} without retrying",
            elapsed
        );
    }
}
