//! Core data models used throughout the assistant.
//!
//! These types represent the warehouse schema documents, context chunks,
//! and chat state that flow through the indexing and generation pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Warehouse backends the assistant can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbKind {
    Postgres,
    Snowflake,
    Databricks,
}

impl DbKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbKind::Postgres => "postgres",
            DbKind::Snowflake => "snowflake",
            DbKind::Databricks => "databricks",
        }
    }
}

impl fmt::Display for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(DbKind::Postgres),
            "snowflake" => Ok(DbKind::Snowflake),
            "databricks" => Ok(DbKind::Databricks),
            other => anyhow::bail!("Unknown warehouse kind: {}", other),
        }
    }
}

/// Key participation of a column, when it has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    Primary,
    Foreign,
}

/// Target of a foreign key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_precision: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_scale: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_role: Option<KeyRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub row_count: i64,
    pub columns: Vec<ColumnInfo>,
}

/// Table-to-table link rendered as `"table.column"` endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub references: String,
}

/// Canonical schema document shared by every backend. Serialized to
/// pretty JSON on disk and chunked into the context store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaDoc {
    pub tables: Vec<TableInfo>,
    pub relationships: Vec<Relationship>,
}

impl SchemaDoc {
    /// Builds a document from introspected tables, deriving the
    /// relationship list from foreign key columns with a resolvable
    /// target.
    pub fn from_tables(tables: Vec<TableInfo>) -> Self {
        let mut relationships = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if column.key_role != Some(KeyRole::Foreign) {
                    continue;
                }
                if let Some(target) = &column.references {
                    relationships.push(Relationship {
                        source: format!("{}.{}", table.name, column.name),
                        references: format!("{}.{}", target.table, target.column),
                    });
                }
            }
        }
        Self {
            tables,
            relationships,
        }
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }
}

/// Parsed metadata corpus: file name to its records, each record a
/// header-to-value map.
pub type MetadataDoc = BTreeMap<String, Vec<BTreeMap<String, String>>>;

/// Tag distinguishing the two document families in the context store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Schema,
    Metadata,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Schema => "schema",
            DocType::Metadata => "metadata",
        }
    }
}

/// One window of a serialized document, ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextChunk {
    pub doc_type: DocType,
    pub seq: i64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Result of executing a statement against a warehouse. Faults are
/// carried in `error`, never raised to the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryOutcome {
    pub rows: Vec<Vec<String>>,
    pub columns: Option<Vec<String>>,
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn ok(columns: Option<Vec<String>>, rows: Vec<Vec<String>>) -> Self {
        Self {
            rows,
            columns,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            columns: None,
            error: Some(error.into()),
        }
    }
}

/// Lifecycle of an assistant session. Ordered so later phases compare
/// greater than earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    Unconnected,
    Connected,
    SchemaLoaded,
    ContextReady,
    Generating,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_kind_round_trip() {
        for kind in [DbKind::Postgres, DbKind::Snowflake, DbKind::Databricks] {
            assert_eq!(kind.as_str().parse::<DbKind>().unwrap(), kind);
        }
        assert!("oracle".parse::<DbKind>().is_err());
    }

    #[test]
    fn test_relationships_derived_from_foreign_keys() {
        let tables = vec![
            TableInfo {
                name: "orders".to_string(),
                row_count: 2,
                columns: vec![
                    ColumnInfo {
                        name: "id".to_string(),
                        data_type: "integer".to_string(),
                        nullable: false,
                        default: None,
                        max_length: None,
                        numeric_precision: Some(32),
                        numeric_scale: Some(0),
                        key_role: Some(KeyRole::Primary),
                        references: None,
                    },
                    ColumnInfo {
                        name: "customer_id".to_string(),
                        data_type: "integer".to_string(),
                        nullable: true,
                        default: None,
                        max_length: None,
                        numeric_precision: Some(32),
                        numeric_scale: Some(0),
                        key_role: Some(KeyRole::Foreign),
                        references: Some(ColumnRef {
                            table: "customers".to_string(),
                            column: "id".to_string(),
                        }),
                    },
                ],
            },
            TableInfo {
                name: "customers".to_string(),
                row_count: 1,
                columns: vec![],
            },
        ];

        let doc = SchemaDoc::from_tables(tables);
        assert_eq!(doc.relationships.len(), 1);
        assert_eq!(doc.relationships[0].source, "orders.customer_id");
        assert_eq!(doc.relationships[0].references, "customers.id");
        assert_eq!(doc.column_count(), 2);
    }

    #[test]
    fn test_foreign_key_without_target_produces_no_relationship() {
        let tables = vec![TableInfo {
            name: "orders".to_string(),
            row_count: 0,
            columns: vec![ColumnInfo {
                name: "customer_id".to_string(),
                data_type: "integer".to_string(),
                nullable: true,
                default: None,
                max_length: None,
                numeric_precision: None,
                numeric_scale: None,
                key_role: Some(KeyRole::Foreign),
                references: None,
            }],
        }];

        let doc = SchemaDoc::from_tables(tables);
        assert!(doc.relationships.is_empty());
    }

    #[test]
    fn test_schema_doc_omits_absent_key_fields() {
        let doc = SchemaDoc::from_tables(vec![TableInfo {
            name: "plain".to_string(),
            row_count: 0,
            columns: vec![ColumnInfo {
                name: "note".to_string(),
                data_type: "text".to_string(),
                nullable: true,
                default: None,
                max_length: None,
                numeric_precision: None,
                numeric_scale: None,
                key_role: None,
                references: None,
            }],
        }]);

        let json = serde_json::to_string(&doc).unwrap();
        assert!(!json.contains("key_role"));
        assert!(!json.contains("references"));
    }

    #[test]
    fn test_session_phase_ordering() {
        assert!(SessionPhase::Unconnected < SessionPhase::Connected);
        assert!(SessionPhase::Connected < SessionPhase::SchemaLoaded);
        assert!(SessionPhase::SchemaLoaded < SessionPhase::ContextReady);
        assert!(SessionPhase::ContextReady < SessionPhase::Generating);
    }

    #[test]
    fn test_query_outcome_constructors() {
        let ok = QueryOutcome::ok(Some(vec!["id".to_string()]), vec![vec!["1".to_string()]]);
        assert!(ok.error.is_none());
        assert_eq!(ok.rows.len(), 1);

        let failed = QueryOutcome::failed("connection refused");
        assert!(failed.rows.is_empty());
        assert!(failed.columns.is_none());
        assert_eq!(failed.error.as_deref(), Some("connection refused"));
    }
}
