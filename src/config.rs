use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::connection::{
    DatabricksCredentials, PostgresCredentials, SnowflakeCredentials, WarehouseCredentials,
};
use crate::models::DbKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub warehouse: Option<WarehouseConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding the context store database.
    pub dir: PathBuf,
    #[serde(default = "default_schema_path")]
    pub schema_path: PathBuf,
    #[serde(default = "default_metadata_path")]
    pub metadata_path: PathBuf,
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("./data/schema.json")
}
fn default_metadata_path() -> PathBuf {
    PathBuf::from("./data/metadata.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_chars: 1000,
            overlap_chars: 200,
        }
    }
}

fn default_window_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Sampling temperature for query generation. Zero keeps the
    /// generated SQL deterministic.
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            temperature: 0.0,
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_max_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    #[serde(default = "default_metadata_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_metadata_globs")]
    pub include_globs: Vec<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            input_dir: default_metadata_input_dir(),
            include_globs: default_metadata_globs(),
        }
    }
}

fn default_metadata_input_dir() -> PathBuf {
    PathBuf::from("./data/metadata_input")
}
fn default_metadata_globs() -> Vec<String> {
    vec!["**/*.csv".to_string(), "**/*.tsv".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Warehouse the CLI commands talk to. The HTTP server takes its
/// credentials per request instead.
#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    pub kind: DbKind,
    #[serde(default)]
    pub postgres: Option<PostgresCredentials>,
    #[serde(default)]
    pub snowflake: Option<SnowflakeCredentials>,
    #[serde(default)]
    pub databricks: Option<DatabricksCredentials>,
}

impl WarehouseConfig {
    /// Resolves the credential table matching `kind`. A missing,
    /// mismatched, or surplus table is a config error, caught before
    /// any network traffic.
    pub fn credentials(&self) -> Result<WarehouseCredentials> {
        let tables = [
            (DbKind::Postgres, self.postgres.is_some()),
            (DbKind::Snowflake, self.snowflake.is_some()),
            (DbKind::Databricks, self.databricks.is_some()),
        ];
        for (table, present) in tables {
            if present && table != self.kind {
                return Err(surplus_credentials(self.kind, table));
            }
        }

        match self.kind {
            DbKind::Postgres => self
                .postgres
                .clone()
                .map(WarehouseCredentials::Postgres)
                .ok_or_else(|| missing_credentials(self.kind)),
            DbKind::Snowflake => self
                .snowflake
                .clone()
                .map(WarehouseCredentials::Snowflake)
                .ok_or_else(|| missing_credentials(self.kind)),
            DbKind::Databricks => self
                .databricks
                .clone()
                .map(WarehouseCredentials::Databricks)
                .ok_or_else(|| missing_credentials(self.kind)),
        }
    }
}

fn missing_credentials(kind: DbKind) -> anyhow::Error {
    anyhow::anyhow!(
        "warehouse.kind is '{}' but no [warehouse.{}] credentials are configured",
        kind,
        kind
    )
}

fn surplus_credentials(kind: DbKind, surplus: DbKind) -> anyhow::Error {
    anyhow::anyhow!(
        "warehouse.kind is '{}' but [warehouse.{}] credentials are also configured; keep exactly one credential table",
        kind,
        surplus
    )
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.window_chars == 0 {
        anyhow::bail!("chunking.window_chars must be > 0");
    }

    if config.chunking.overlap_chars >= config.chunking.window_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.window_chars");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate llm
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate warehouse credentials against the declared kind
    if let Some(warehouse) = &config.warehouse {
        warehouse.credentials()?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"
[store]
dir = "./data/context_store"

[server]
bind = "127.0.0.1:8000"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.chunking.window_chars, 1000);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.provider, "disabled");
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.llm.provider, "disabled");
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(
            config.store.schema_path,
            PathBuf::from("./data/schema.json")
        );
        assert!(config.warehouse.is_none());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        let file = write_config(
            r#"
[store]
dir = "./data/context_store"

[chunking]
window_chars = 200
overlap_chars = 200

[server]
bind = "127.0.0.1:8000"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let file = write_config(
            r#"
[store]
dir = "./data/context_store"

[embedding]
provider = "openai"

[server]
bind = "127.0.0.1:8000"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_providers_rejected() {
        let file = write_config(
            r#"
[store]
dir = "./data/context_store"

[embedding]
provider = "quantum"
model = "m"
dims = 4

[server]
bind = "127.0.0.1:8000"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_warehouse_kind_requires_matching_credentials() {
        let file = write_config(
            r#"
[store]
dir = "./data/context_store"

[server]
bind = "127.0.0.1:8000"

[warehouse]
kind = "snowflake"

[warehouse.postgres]
host = "localhost"
user = "u"
password = "p"
dbname = "d"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("snowflake"));
    }

    #[test]
    fn test_surplus_credential_table_rejected() {
        let file = write_config(
            r#"
[store]
dir = "./data/context_store"

[server]
bind = "127.0.0.1:8000"

[warehouse]
kind = "postgres"

[warehouse.postgres]
host = "localhost"
user = "u"
password = "p"
dbname = "d"

[warehouse.snowflake]
account = "acme"
user = "u"
password = "p"
warehouse = "wh"
database = "db"
schema = "public"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("[warehouse.snowflake]"), "got: {}", message);
        assert!(message.contains("also configured"), "got: {}", message);
    }

    #[test]
    fn test_warehouse_credentials_resolve() {
        let file = write_config(
            r#"
[store]
dir = "./data/context_store"

[server]
bind = "127.0.0.1:8000"

[warehouse]
kind = "postgres"

[warehouse.postgres]
host = "localhost"
user = "analyst"
password = "secret"
dbname = "sales"
"#,
        );
        let config = load_config(file.path()).unwrap();
        let creds = config.warehouse.unwrap().credentials().unwrap();
        match creds {
            WarehouseCredentials::Postgres(pg) => {
                assert_eq!(pg.host, "localhost");
                assert_eq!(pg.port, 5432);
                assert_eq!(pg.dbname, "sales");
            }
            other => panic!("unexpected credentials: {:?}", other),
        }
    }
}
