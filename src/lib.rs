//! # NL-SQL
//!
//! A natural-language-to-SQL assistant for Postgres, Snowflake, and
//! Databricks warehouses.
//!
//! NL-SQL introspects a connected warehouse, ingests tabular business
//! metadata, chunks and embeds both into a SQLite-backed context store,
//! and prompts a chat model with the retrieved context to turn
//! questions into SQL. The pipeline is exposed as CLI commands and as
//! an HTTP API with server-sent generation events.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Warehouse  │──▶│  Pipeline   │──▶│  SQLite  │
//! │ PG/SF/DBX  │   │ Chunk+Embed │   │ vectors  │
//! └────────────┘   └─────────────┘   └────┬─────┘
//!                                         │
//!                      ┌──────────────────┤
//!                      ▼                  ▼
//!                 ┌──────────┐      ┌──────────┐
//!                 │   CLI    │      │   HTTP   │
//!                 │  (nlq)   │      │  (SSE)   │
//!                 └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! nlq test                      # probe warehouse credentials
//! nlq introspect                # capture the schema document
//! nlq metadata                  # ingest tabular metadata
//! nlq index                     # chunk + embed into the store
//! nlq ask "revenue by region"   # generate SQL
//! nlq serve                     # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`connection`] | Warehouse connection trait and result formatting |
//! | [`backend_postgres`] | Postgres backend |
//! | [`backend_snowflake`] | Snowflake SQL API backend |
//! | [`backend_databricks`] | Databricks statement API backend |
//! | [`introspect`] | Schema capture |
//! | [`metadata`] | Delimited-file metadata ingestion |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Context store build and retrieval |
//! | [`prompt`] | Prompt assembly |
//! | [`rules`] | Question-conditional prompt rules |
//! | [`llm`] | Chat completion providers |
//! | [`generate`] | Generation orchestrator |
//! | [`session`] | Session phases and chat history |
//! | [`server`] | HTTP server |
//! | [`db`] | Store database connection |

pub mod backend_databricks;
pub mod backend_postgres;
pub mod backend_snowflake;
pub mod chunk;
pub mod config;
pub mod connection;
pub mod db;
pub mod embedding;
pub mod generate;
pub mod introspect;
pub mod llm;
pub mod metadata;
pub mod models;
pub mod prompt;
pub mod rules;
pub mod server;
pub mod session;
pub mod store;
