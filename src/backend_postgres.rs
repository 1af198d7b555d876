//! Postgres backend.
//!
//! Opens a fresh connection per call against the configured database
//! and introspects the `public` schema. Result cells are decoded by
//! Postgres type name and rendered as display strings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, ConnectOptions, Connection, Row, TypeInfo};

use crate::connection::{PostgresCredentials, WarehouseConnection};
use crate::models::{ColumnInfo, ColumnRef, DbKind, KeyRole, QueryOutcome, SchemaDoc, TableInfo};

const TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

/// One row per column with key participation resolved inline. `$1` is
/// the table name.
const COLUMNS_SQL: &str = r#"
SELECT
    c.column_name::text AS column_name,
    c.data_type::text AS data_type,
    c.is_nullable::text AS is_nullable,
    c.column_default::text AS column_default,
    c.character_maximum_length::int4 AS character_maximum_length,
    c.numeric_precision::int4 AS numeric_precision,
    c.numeric_scale::int4 AS numeric_scale,
    pk.column_name IS NOT NULL AS is_primary,
    fk.column_name IS NOT NULL AS is_foreign,
    fk.foreign_table_name::text AS foreign_table_name,
    fk.foreign_column_name::text AS foreign_column_name
FROM information_schema.columns c
LEFT JOIN (
    SELECT ku.column_name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage ku
        ON tc.constraint_name = ku.constraint_name
    WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_name = $1
) pk ON c.column_name = pk.column_name
LEFT JOIN (
    SELECT kcu.column_name,
           ccu.table_name AS foreign_table_name,
           ccu.column_name AS foreign_column_name
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
    JOIN information_schema.constraint_column_usage ccu
        ON tc.constraint_name = ccu.constraint_name
    WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_name = $1
) fk ON c.column_name = fk.column_name
WHERE c.table_name = $1 AND c.table_schema = 'public'
ORDER BY c.ordinal_position
"#;

pub struct PostgresConnection {
    creds: PostgresCredentials,
}

impl PostgresConnection {
    pub fn new(creds: PostgresCredentials) -> Self {
        Self { creds }
    }

    async fn open(&self) -> Result<PgConnection> {
        let options = PgConnectOptions::new()
            .host(&self.creds.host)
            .port(self.creds.port)
            .username(&self.creds.user)
            .password(&self.creds.password)
            .database(&self.creds.dbname);

        let conn = options.connect().await.with_context(|| {
            format!(
                "Failed to connect to Postgres at {}:{}",
                self.creds.host, self.creds.port
            )
        })?;
        Ok(conn)
    }

    async fn probe(&self) -> Result<()> {
        let mut conn = self.open().await?;
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&mut conn)
            .await?;
        conn.close().await.ok();
        Ok(())
    }

    async fn run_query(&self, sql: &str) -> Result<(Option<Vec<String>>, Vec<Vec<String>>)> {
        let mut conn = self.open().await?;
        let rows = sqlx::query(sql).fetch_all(&mut conn).await?;
        conn.close().await.ok();

        let columns = rows.first().map(|row| {
            row.columns()
                .iter()
                .map(|col| col.name().to_string())
                .collect()
        });
        let data = rows.iter().map(decode_row).collect();
        Ok((columns, data))
    }
}

#[async_trait]
impl WarehouseConnection for PostgresConnection {
    fn kind(&self) -> DbKind {
        DbKind::Postgres
    }

    async fn test(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(e) => {
                eprintln!("Warning: Postgres connection failed: {:#}", e);
                false
            }
        }
    }

    async fn execute(&self, sql: &str) -> QueryOutcome {
        match self.run_query(sql).await {
            Ok((columns, rows)) => QueryOutcome::ok(columns, rows),
            Err(e) => QueryOutcome::failed(format!("{:#}", e)),
        }
    }

    async fn introspect(&self) -> Result<SchemaDoc> {
        let mut conn = self.open().await?;

        let table_names: Vec<String> = sqlx::query_scalar(TABLES_SQL)
            .fetch_all(&mut conn)
            .await
            .context("Failed to list tables")?;

        let mut tables = Vec::with_capacity(table_names.len());
        for name in table_names {
            let columns = table_columns(&mut conn, &name)
                .await
                .with_context(|| format!("Failed to introspect columns of {}", name))?;
            let row_count = table_row_count(&mut conn, &name).await;
            tables.push(TableInfo {
                name,
                row_count,
                columns,
            });
        }

        conn.close().await.ok();
        Ok(SchemaDoc::from_tables(tables))
    }
}

async fn table_columns(conn: &mut PgConnection, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query(COLUMNS_SQL)
        .bind(table)
        .fetch_all(conn)
        .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let is_primary: bool = row.try_get("is_primary")?;
        let is_foreign: bool = row.try_get("is_foreign")?;
        let foreign_table: Option<String> = row.try_get("foreign_table_name")?;
        let foreign_column: Option<String> = row.try_get("foreign_column_name")?;

        let key_role = if is_primary {
            Some(KeyRole::Primary)
        } else if is_foreign {
            Some(KeyRole::Foreign)
        } else {
            None
        };
        let references = match (foreign_table, foreign_column) {
            (Some(table), Some(column)) if is_foreign => Some(ColumnRef { table, column }),
            _ => None,
        };

        let nullable: String = row.try_get("is_nullable")?;
        columns.push(ColumnInfo {
            name: row.try_get("column_name")?,
            data_type: row.try_get("data_type")?,
            nullable: nullable == "YES",
            default: row.try_get("column_default")?,
            max_length: row
                .try_get::<Option<i32>, _>("character_maximum_length")?
                .map(i64::from),
            numeric_precision: row
                .try_get::<Option<i32>, _>("numeric_precision")?
                .map(i64::from),
            numeric_scale: row
                .try_get::<Option<i32>, _>("numeric_scale")?
                .map(i64::from),
            key_role,
            references,
        });
    }
    Ok(columns)
}

/// Best effort. Tables we cannot count (locks, missing grants) report
/// zero rows rather than failing the whole introspection.
async fn table_row_count(conn: &mut PgConnection, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\""));
    match sqlx::query_scalar::<_, i64>(&sql).fetch_one(conn).await {
        Ok(count) => count,
        Err(e) => {
            eprintln!("Warning: failed to count rows in {}: {}", table, e);
            0
        }
    }
}

fn decode_row(row: &PgRow) -> Vec<String> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| decode_cell(row, idx, col.type_info().name()))
        .collect()
}

/// Decode one cell by Postgres type name. NULLs and undecodable values
/// of known types render as "NULL"; unknown types fall back to a text
/// read, then to a type placeholder.
fn decode_cell(row: &PgRow, idx: usize, type_name: &str) -> String {
    match type_name {
        "BOOL" => display(row.try_get::<Option<bool>, _>(idx)),
        "INT2" => display(row.try_get::<Option<i16>, _>(idx)),
        "INT4" => display(row.try_get::<Option<i32>, _>(idx)),
        "INT8" => display(row.try_get::<Option<i64>, _>(idx)),
        "FLOAT4" => display(row.try_get::<Option<f32>, _>(idx)),
        "FLOAT8" => display(row.try_get::<Option<f64>, _>(idx)),
        "NUMERIC" => display(row.try_get::<Option<rust_decimal::Decimal>, _>(idx)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "CITEXT" => {
            display(row.try_get::<Option<String>, _>(idx))
        }
        "DATE" => display(row.try_get::<Option<chrono::NaiveDate>, _>(idx)),
        "TIME" => display(row.try_get::<Option<chrono::NaiveTime>, _>(idx)),
        "TIMESTAMP" => display(row.try_get::<Option<chrono::NaiveDateTime>, _>(idx)),
        "TIMESTAMPTZ" => display(row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)),
        "UUID" => display(row.try_get::<Option<uuid::Uuid>, _>(idx)),
        "JSON" | "JSONB" => display(row.try_get::<Option<serde_json::Value>, _>(idx)),
        other => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or_else(|| format!("<{}>", other.to_lowercase())),
    }
}

fn display<T: std::fmt::Display>(value: Result<Option<T>, sqlx::Error>) -> String {
    match value {
        Ok(Some(v)) => v.to_string(),
        _ => "NULL".to_string(),
    }
}
