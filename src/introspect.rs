//! Schema loading and persistence.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::connection::WarehouseConnection;
use crate::models::{DbKind, SchemaDoc};

/// Introspect through an established connection. The requested kind
/// must match the connection; a mismatch is a configuration error and
/// fails before any catalog traffic.
pub async fn load_schema(conn: &dyn WarehouseConnection, kind: DbKind) -> Result<SchemaDoc> {
    if conn.kind() != kind {
        bail!(
            "Warehouse kind mismatch: connection is {}, schema load requested {}",
            conn.kind(),
            kind
        );
    }
    conn.introspect().await
}

/// Write the document as pretty JSON, replacing any previous copy.
pub fn save_schema(doc: &SchemaDoc, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(doc)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write schema document to {}", path.display()))
}

pub fn load_schema_file(path: &Path) -> Result<SchemaDoc> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema document: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid schema document: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_snowflake::SnowflakeConnection;
    use crate::connection::SnowflakeCredentials;
    use crate::models::{ColumnInfo, TableInfo};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_kind_mismatch_fails_before_any_network() {
        let conn = SnowflakeConnection::new(SnowflakeCredentials {
            account: "acme".to_string(),
            user: "u".to_string(),
            password: "p".to_string(),
            warehouse: "w".to_string(),
            database: "d".to_string(),
            schema: "s".to_string(),
        });

        let err = load_schema(&conn, DbKind::Postgres).await.unwrap_err();
        assert!(err.to_string().contains("kind mismatch"));
        assert!(err.to_string().contains("snowflake"));
    }

    #[test]
    fn test_schema_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("schema.json");

        let doc = SchemaDoc::from_tables(vec![TableInfo {
            name: "events".to_string(),
            row_count: 7,
            columns: vec![ColumnInfo {
                name: "id".to_string(),
                data_type: "bigint".to_string(),
                nullable: false,
                default: None,
                max_length: None,
                numeric_precision: Some(64),
                numeric_scale: Some(0),
                key_role: None,
                references: None,
            }],
        }]);

        save_schema(&doc, &path).unwrap();
        let loaded = load_schema_file(&path).unwrap();
        assert_eq!(loaded, doc);

        // Pretty printed on disk for chunk-friendly text.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"tables\""));
    }

    #[test]
    fn test_save_replaces_previous_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.json");

        let first = SchemaDoc::from_tables(vec![TableInfo {
            name: "old_table".to_string(),
            row_count: 0,
            columns: vec![],
        }]);
        save_schema(&first, &path).unwrap();

        let second = SchemaDoc::default();
        save_schema(&second, &path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("old_table"));
    }
}
