//! Context store build and retrieval.
//!
//! Builds the vector store from the schema and metadata documents:
//! serialize each to pretty JSON, window the text, embed the windows,
//! and persist them tagged by document family. A rebuild replaces the
//! previous contents wholesale. Retrieval runs one tag-filtered
//! similarity lookup per family and degrades to empty context on any
//! fault, so generation can fail soft.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::{ContextChunk, DocType, MetadataDoc, SchemaDoc};

/// Counts reported after a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub schema_chunks: usize,
    pub metadata_chunks: usize,
    pub model: String,
}

/// Build the context store from the given documents. Returns `None`
/// without touching disk when there is nothing to index, so callers
/// can tell an empty build from a successful one.
pub async fn build_store(
    config: &Config,
    schema: Option<&SchemaDoc>,
    metadata: Option<&MetadataDoc>,
) -> Result<Option<BuildReport>> {
    let window = config.chunking.window_chars;
    let overlap = config.chunking.overlap_chars;

    let mut chunks: Vec<ContextChunk> = Vec::new();
    if let Some(doc) = schema {
        let text = serde_json::to_string_pretty(doc)?;
        chunks.extend(chunk_document(DocType::Schema, &text, window, overlap));
    }
    if let Some(doc) = metadata {
        if !doc.is_empty() {
            let text = serde_json::to_string_pretty(doc)?;
            chunks.extend(chunk_document(DocType::Metadata, &text, window, overlap));
        }
    }

    if chunks.is_empty() {
        return Ok(None);
    }

    let schema_chunks = chunks
        .iter()
        .filter(|c| c.doc_type == DocType::Schema)
        .count();
    let metadata_chunks = chunks.len() - schema_chunks;

    let provider = embedding::create_provider(&config.embedding)?;
    let vectors = embed_chunks(provider.as_ref(), config, &chunks).await?;

    let pool = db::connect_store(&config.store.dir).await?;
    let result = replace_chunks(&pool, &chunks, &vectors, provider.model_name(), provider.dims())
        .await
        .context("Failed to persist context store");
    pool.close().await;
    result?;

    Ok(Some(BuildReport {
        schema_chunks,
        metadata_chunks,
        model: provider.model_name().to_string(),
    }))
}

async fn embed_chunks(
    provider: &dyn EmbeddingProvider,
    config: &Config,
    chunks: &[ContextChunk],
) -> Result<Vec<Vec<f32>>> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(config.embedding.batch_size.max(1)) {
        let embedded = embedding::embed_texts(provider, &config.embedding, batch).await?;
        vectors.extend(embedded);
    }
    Ok(vectors)
}

/// Replace the store contents in one transaction. Old chunks from a
/// previous build never survive a rebuild.
pub(crate) async fn replace_chunks(
    pool: &SqlitePool,
    chunks: &[ContextChunk],
    vectors: &[Vec<f32>],
    model: &str,
    dims: usize,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;

    let now = chrono::Utc::now().timestamp();
    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        sqlx::query(
            "INSERT INTO chunks (doc_type, seq, content, embedding, model, dims, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(chunk.doc_type.as_str())
        .bind(chunk.seq)
        .bind(&chunk.text)
        .bind(embedding::vec_to_blob(vector))
        .bind(model)
        .bind(dims as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Retrieve schema and metadata context for a question. Any fault
/// (missing store, provider down) degrades to empty strings with a
/// warning; the caller decides whether empty schema context is fatal.
pub async fn retrieve_context(config: &Config, question: &str) -> (String, String) {
    match try_retrieve(config, question).await {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("Warning: context retrieval failed: {:#}", e);
            (String::new(), String::new())
        }
    }
}

async fn try_retrieve(config: &Config, question: &str) -> Result<(String, String)> {
    let pool = db::open_store(&config.store.dir).await?;
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, question).await?;

    let k = config.retrieval.top_k;
    let schema = query_tagged(&pool, &query_vec, DocType::Schema, k).await?;
    let metadata = query_tagged(&pool, &query_vec, DocType::Metadata, k).await?;
    pool.close().await;

    Ok((schema.join("\n\n"), metadata.join("\n\n")))
}

/// Top-k chunks of one document family by cosine similarity, best
/// first. The scan is brute force; stores hold one schema and one
/// metadata document, so the chunk count stays small.
pub(crate) async fn query_tagged(
    pool: &SqlitePool,
    query_vec: &[f32],
    doc_type: DocType,
    k: usize,
) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT content, embedding FROM chunks WHERE doc_type = ?")
        .bind(doc_type.as_str())
        .fetch_all(pool)
        .await?;

    let mut scored: Vec<(f32, String)> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vector = embedding::blob_to_vec(&blob);
            let content: String = row.get("content");
            (embedding::cosine_similarity(query_vec, &vector), content)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);

    Ok(scored.into_iter().map(|(_, content)| content).collect())
}
