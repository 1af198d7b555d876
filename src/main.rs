//! # NL-SQL CLI (`nlq`)
//!
//! The `nlq` binary is the command-line interface to the assistant. It
//! provides commands for probing the warehouse connection, schema
//! introspection, metadata ingestion, context store builds, SQL
//! generation, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! nlq --config ./config/nlsql.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nlq test` | Probe the configured warehouse connection |
//! | `nlq introspect` | Introspect the warehouse and write the schema document |
//! | `nlq metadata` | Ingest the metadata corpus into the metadata document |
//! | `nlq index` | Chunk, embed, and store the schema and metadata documents |
//! | `nlq ask "<question>"` | Generate SQL for a natural-language question |
//! | `nlq exec "<sql>"` | Run SQL against the warehouse and print the results |
//! | `nlq serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Verify warehouse credentials
//! nlq test --config ./config/nlsql.toml
//!
//! # Capture the schema, then build the context store
//! nlq introspect --config ./config/nlsql.toml
//! nlq index --config ./config/nlsql.toml
//!
//! # One-shot generation
//! nlq ask "total revenue by region last quarter"
//!
//! # Inspect what context the generator sees
//! nlq ask "top customers by orders" --show-context
//!
//! # Start the HTTP API
//! nlq serve --config ./config/nlsql.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nlsql::config::{self, Config};
use nlsql::connection::{self, format_results, WarehouseCredentials};
use nlsql::generate;
use nlsql::introspect;
use nlsql::metadata;
use nlsql::models::DbKind;
use nlsql::server;
use nlsql::store;

/// NL-SQL — a natural-language-to-SQL assistant for Postgres,
/// Snowflake, and Databricks.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/nlsql.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "nlq",
    about = "NL-SQL — a natural-language-to-SQL assistant for Postgres, Snowflake, and Databricks",
    version,
    long_about = "NL-SQL turns natural-language questions into SQL for a connected warehouse. \
    It introspects the warehouse schema, ingests tabular business metadata, builds an embedded \
    context store, and prompts a chat model with the retrieved context. The same pipeline is \
    exposed over an HTTP API for browser front ends."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/nlsql.toml`. All warehouse, store, embedding,
    /// model, and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/nlsql.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Probe the configured warehouse connection.
    ///
    /// Connects with the credentials from `[warehouse.<kind>]` and runs
    /// a trivial statement. Exits non-zero when the warehouse is
    /// unreachable or rejects the credentials.
    Test,

    /// Introspect the warehouse and write the schema document.
    ///
    /// Walks the catalog of the connected warehouse (tables, columns,
    /// types, keys, row counts) and writes the result as JSON to
    /// `[store].schema_path`. Rerunning replaces the document.
    Introspect,

    /// Ingest the metadata corpus into the metadata document.
    ///
    /// Scans `[metadata].input_dir` for delimited files matching the
    /// configured globs, parses them into records, and writes the result
    /// as JSON to `[store].metadata_path`.
    Metadata,

    /// Chunk, embed, and store the schema and metadata documents.
    ///
    /// Reads the documents written by `introspect` and `metadata`, splits
    /// them into overlapping chunks, embeds each chunk with the configured
    /// provider, and rebuilds the context store. Requires `[embedding]`
    /// to be enabled.
    Index,

    /// Generate SQL for a natural-language question.
    ///
    /// Retrieves schema and metadata context from the store, prompts the
    /// configured chat model, and prints the generated query. Generation
    /// faults are printed as text rather than failing the command.
    Ask {
        /// The question to translate into SQL.
        question: String,

        /// Print the retrieved schema and metadata context before the query.
        #[arg(long)]
        show_context: bool,
    },

    /// Run SQL against the warehouse and print the results.
    ///
    /// Statement faults are reported in the formatted output rather than
    /// failing the command; only a missing warehouse configuration exits
    /// non-zero.
    Exec {
        /// The SQL statement to run.
        sql: String,
    },

    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// connect, schema, store, generate, and execute endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Test => cmd_test(&cfg).await?,
        Commands::Introspect => cmd_introspect(&cfg).await?,
        Commands::Metadata => cmd_metadata(&cfg)?,
        Commands::Index => cmd_index(&cfg).await?,
        Commands::Ask {
            question,
            show_context,
        } => cmd_ask(&cfg, &question, show_context).await?,
        Commands::Exec { sql } => cmd_exec(&cfg, &sql).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

/// Resolve the warehouse credentials from config, or fail with a
/// pointer at the missing section.
fn warehouse_credentials(cfg: &Config) -> Result<(WarehouseCredentials, DbKind)> {
    let warehouse = cfg
        .warehouse
        .as_ref()
        .context("No [warehouse] section in config file")?;
    Ok((warehouse.credentials()?, warehouse.kind))
}

async fn cmd_test(cfg: &Config) -> Result<()> {
    let (credentials, kind) = warehouse_credentials(cfg)?;
    let conn = connection::connect(credentials);
    if conn.test().await {
        println!("Connection OK ({})", kind);
        Ok(())
    } else {
        bail!("Connection failed");
    }
}

async fn cmd_introspect(cfg: &Config) -> Result<()> {
    let (credentials, kind) = warehouse_credentials(cfg)?;
    let conn = connection::connect(credentials);
    let doc = introspect::load_schema(conn.as_ref(), kind).await?;
    introspect::save_schema(&doc, &cfg.store.schema_path)?;

    println!("introspect {}", kind);
    println!("  tables: {}", doc.tables.len());
    println!("  columns: {}", doc.column_count());
    println!("  relationships: {}", doc.relationships.len());
    println!("  schema written to: {}", cfg.store.schema_path.display());
    println!("ok");
    Ok(())
}

fn cmd_metadata(cfg: &Config) -> Result<()> {
    let doc = metadata::load_metadata(&cfg.metadata)?;
    metadata::save_metadata(&doc, &cfg.store.metadata_path)?;

    println!("metadata {}", cfg.metadata.input_dir.display());
    for (file, records) in &doc {
        println!("  {}: {} records", file, records.len());
    }
    println!(
        "  metadata written to: {}",
        cfg.store.metadata_path.display()
    );
    println!("ok");
    Ok(())
}

async fn cmd_index(cfg: &Config) -> Result<()> {
    let schema = if cfg.store.schema_path.exists() {
        Some(introspect::load_schema_file(&cfg.store.schema_path)?)
    } else {
        eprintln!(
            "Warning: schema document not found at {}; run `nlq introspect` first",
            cfg.store.schema_path.display()
        );
        None
    };

    let metadata_doc = if cfg.store.metadata_path.exists() {
        Some(metadata::load_metadata_file(&cfg.store.metadata_path)?)
    } else {
        None
    };

    match store::build_store(cfg, schema.as_ref(), metadata_doc.as_ref()).await? {
        Some(report) => {
            println!("index");
            println!("  schema chunks: {}", report.schema_chunks);
            println!("  metadata chunks: {}", report.metadata_chunks);
            println!("  embedding model: {}", report.model);
            println!("  store written to: {}", cfg.store.dir.display());
            println!("ok");
        }
        None => {
            println!("No content to index; store not created.");
        }
    }
    Ok(())
}

async fn cmd_ask(cfg: &Config, question: &str, show_context: bool) -> Result<()> {
    let kind = cfg
        .warehouse
        .as_ref()
        .map(|w| w.kind)
        .context("No [warehouse] section in config file")?;

    let sql = if show_context {
        let (schema_context, metadata_context) = store::retrieve_context(cfg, question).await;
        println!("--- schema context ---");
        println!("{}", schema_context);
        println!("--- metadata context ---");
        println!("{}", metadata_context);
        println!("--- generated query ---");
        generate::generate_sql_with_context(
            cfg,
            question,
            &[],
            kind,
            &schema_context,
            &metadata_context,
        )
        .await
    } else {
        generate::generate_sql(cfg, question, &[], kind).await
    };
    println!("{}", sql);
    Ok(())
}

async fn cmd_exec(cfg: &Config, sql: &str) -> Result<()> {
    let (credentials, _) = warehouse_credentials(cfg)?;
    let conn = connection::connect(credentials);
    let outcome = conn.execute(sql).await;
    println!("{}", format_results(&outcome));
    Ok(())
}
