//! Databricks backend.
//!
//! Uses the SQL Statement Execution API against a SQL warehouse. The
//! warehouse id is the trailing segment of the configured HTTP path.
//! Transient submit failures (429, 5xx, network) are retried with
//! exponential backoff. Statements left PENDING or RUNNING after the
//! synchronous wait are polled by statement id until they reach a
//! terminal state; an accepted statement is only ever polled, never
//! resubmitted.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::connection::{json_cell, render_cells, DatabricksCredentials, WarehouseConnection};
use crate::models::{ColumnInfo, DbKind, QueryOutcome, SchemaDoc, TableInfo};

const REQUEST_TIMEOUT_SECS: u64 = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLLS: u32 = 120;
const SUBMIT_RETRIES: u32 = 2;

type ResultSet = (Option<Vec<String>>, Vec<Vec<Option<String>>>);

pub struct DatabricksConnection {
    creds: DatabricksCredentials,
}

impl DatabricksConnection {
    pub fn new(creds: DatabricksCredentials) -> Self {
        Self { creds }
    }

    fn statements_url(&self) -> String {
        let host = self
            .creds
            .server_hostname
            .trim_start_matches("https://")
            .trim_end_matches('/');
        format!("https://{}/api/2.0/sql/statements", host)
    }

    fn warehouse_id(&self) -> Result<&str> {
        self.creds
            .http_path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "Cannot derive a warehouse id from http_path '{}'",
                    self.creds.http_path
                )
            })
    }

    fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")
    }

    async fn submit(&self, sql: &str) -> Result<ResultSet> {
        let client = self.client()?;
        let body = serde_json::json!({
            "statement": sql,
            "warehouse_id": self.warehouse_id()?,
            "wait_timeout": "30s",
            "on_wait_timeout": "CONTINUE",
        });

        let mut last_err = None;

        for attempt in 0..=SUBMIT_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(self.statements_url())
                .bearer_auth(&self.creds.access_token)
                .json(&body)
                .send()
                .await;

            let response = match resp {
                Ok(response) => response,
                Err(e) => {
                    last_err = Some(anyhow::Error::new(e).context(format!(
                        "Failed to reach Databricks at {}",
                        self.creds.server_hostname
                    )));
                    continue;
                }
            };

            let status = response.status();

            // Rate limited or server error — retry
            if status.as_u16() == 429 || status.is_server_error() {
                let body_text = response.text().await.unwrap_or_default();
                last_err = Some(anyhow!("Databricks API error {}: {}", status, body_text));
                continue;
            }

            let payload: Value = response
                .json()
                .await
                .context("Invalid response from Databricks")?;

            // Client error (not 429) — don't retry
            if !status.is_success() {
                bail!("Databricks API error {}: {}", status, api_message(&payload));
            }

            return self.poll(&client, payload).await;
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Databricks submit failed after retries")))
    }

    /// Poll an accepted statement to a terminal state. Runs zero
    /// iterations when the synchronous wait already finished it.
    async fn poll(&self, client: &reqwest::Client, mut payload: Value) -> Result<ResultSet> {
        let statement_id = payload
            .get("statement_id")
            .and_then(|id| id.as_str())
            .map(str::to_string);

        let mut polls = 0;
        while matches!(statement_state(&payload).as_str(), "PENDING" | "RUNNING") {
            let id = statement_id
                .as_deref()
                .ok_or_else(|| anyhow!("Databricks returned a pending statement without an id"))?;
            polls += 1;
            if polls > MAX_POLLS {
                bail!("Databricks statement {} did not finish in time", id);
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = client
                .get(format!("{}/{}", self.statements_url(), id))
                .bearer_auth(&self.creds.access_token)
                .send()
                .await
                .context("Failed to poll Databricks statement status")?;
            let status = response.status();
            payload = response
                .json()
                .await
                .context("Invalid response from Databricks")?;
            if !status.is_success() {
                bail!("Databricks API error {}: {}", status, api_message(&payload));
            }
        }

        match statement_state(&payload).as_str() {
            "SUCCEEDED" => parse_statement_result(&payload),
            state => bail!(
                "Databricks statement {}: {}",
                state.to_lowercase(),
                error_detail(&payload)
            ),
        }
    }

    async fn table_row_count(&self, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
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
impl WarehouseConnection for DatabricksConnection {
    fn kind(&self) -> DbKind {
        DbKind::Databricks
    }

    async fn test(&self) -> bool {
        match self.submit("SELECT 1").await {
            Ok(_) => true,
            Err(e) => {
                eprintln!("Warning: Databricks connection failed: {:#}", e);
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
        let tables_sql = "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type <> 'VIEW' \
             ORDER BY table_name";
        let (_, table_rows) = self
            .submit(tables_sql)
            .await
            .context("Failed to list Databricks tables")?;
        let table_names: Vec<String> = table_rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect();

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            let columns_sql = format!(
                "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = '{}' \
                 ORDER BY ordinal_position",
                name.replace('\'', "''")
            );
            let (_, column_rows) = self
                .submit(&columns_sql)
                .await
                .with_context(|| format!("Failed to introspect columns of {}", name))?;
            let row_count = self.table_row_count(&name).await;

            let columns = column_rows
                .into_iter()
                .map(|row| {
                    let mut cells = row.into_iter();
                    let column_name = cells.next().flatten().unwrap_or_default();
                    let data_type = cells.next().flatten().unwrap_or_default();
                    let is_nullable = cells.next().flatten().unwrap_or_default();
                    let default = cells.next().flatten();
                    ColumnInfo {
                        name: column_name,
                        data_type,
                        nullable: is_nullable.eq_ignore_ascii_case("YES"),
                        default,
                        max_length: None,
                        numeric_precision: None,
                        numeric_scale: None,
                        key_role: None,
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

fn statement_state(payload: &Value) -> String {
    payload
        .pointer("/status/state")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_string()
}

fn api_message(payload: &Value) -> String {
    payload
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown error")
        .to_string()
}

fn error_detail(payload: &Value) -> String {
    payload
        .pointer("/status/error/message")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown error")
        .to_string()
}

/// Column names come from the manifest schema, cells from the inline
/// data array.
fn parse_statement_result(payload: &Value) -> Result<ResultSet> {
    let columns = payload
        .pointer("/manifest/schema/columns")
        .and_then(|c| c.as_array())
        .map(|cols| {
            cols.iter()
                .filter_map(|col| col.get("name").and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

    let rows = payload
        .pointer("/result/data_array")
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
