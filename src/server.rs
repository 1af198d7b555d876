//! HTTP server for the assistant.
//!
//! Exposes the connect → load schema → build store → generate flow as
//! a JSON HTTP API. One warehouse session is shared by all requests;
//! chat history is scoped per conversation id.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/connect-postgres/` | Probe and install a Postgres connection |
//! | `POST` | `/connect-snowflake/` | Probe and install a Snowflake connection |
//! | `POST` | `/connect-databricks/` | Probe and install a Databricks connection |
//! | `POST` | `/load-schema/` | Introspect the connected warehouse |
//! | `POST` | `/load-metadata/` | Ingest the metadata corpus |
//! | `POST` | `/create-vector-store/` | Build the context store |
//! | `POST` | `/generate-query/` | Generate SQL, streamed as SSE events |
//! | `POST` | `/execute-query/` | Run SQL and format the results |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Gate and validation failures return:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Database connection not established. Please connect to database first." } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! front ends.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::channel::mpsc;
use futures::{SinkExt, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::connection::{
    self, format_results, DatabricksCredentials, PostgresCredentials, SnowflakeCredentials,
    WarehouseCredentials,
};
use crate::db;
use crate::generate;
use crate::introspect;
use crate::metadata;
use crate::models::DbKind;
use crate::session::{ChatStore, Session};
use crate::store;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    session: Arc<Mutex<Session>>,
    chats: Arc<Mutex<ChatStore>>,
}

/// Starts the HTTP server on `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        config: Arc::new(config.clone()),
        session: Arc::new(Mutex::new(Session::new())),
        chats: Arc::new(Mutex::new(ChatStore::new())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/connect-postgres/", post(handle_connect_postgres))
        .route("/connect-snowflake/", post(handle_connect_snowflake))
        .route("/connect-databricks/", post(handle_connect_databricks))
        .route("/load-schema/", post(handle_load_schema))
        .route("/load-metadata/", post(handle_load_metadata))
        .route("/create-vector-store/", post(handle_create_vector_store))
        .route("/generate-query/", post(handle_generate_query))
        .route("/execute-query/", post(handle_execute_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("nlsql server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Constructs a 500 Internal Server Error.
fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /connect-{backend}/ ============

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_connect_postgres(
    State(state): State<AppState>,
    Json(creds): Json<PostgresCredentials>,
) -> Result<Json<MessageResponse>, AppError> {
    install_connection(&state, WarehouseCredentials::Postgres(creds), "Postgres").await
}

async fn handle_connect_snowflake(
    State(state): State<AppState>,
    Json(creds): Json<SnowflakeCredentials>,
) -> Result<Json<MessageResponse>, AppError> {
    install_connection(&state, WarehouseCredentials::Snowflake(creds), "Snowflake").await
}

async fn handle_connect_databricks(
    State(state): State<AppState>,
    Json(creds): Json<DatabricksCredentials>,
) -> Result<Json<MessageResponse>, AppError> {
    install_connection(&state, WarehouseCredentials::Databricks(creds), "Databricks").await
}

/// Probe the warehouse before installing the connection. A session
/// keeps its previous connection when the probe fails.
async fn install_connection(
    state: &AppState,
    credentials: WarehouseCredentials,
    backend: &str,
) -> Result<Json<MessageResponse>, AppError> {
    let conn = connection::connect(credentials);
    if !conn.test().await {
        return Err(bad_request(format!(
            "Database connection to {} failed",
            backend
        )));
    }

    let mut session = state.session.lock().await;
    session.connected(conn);

    Ok(Json(MessageResponse {
        message: format!("Database connection to {} successful", backend),
    }))
}

// ============ POST /load-schema/ ============

#[derive(Serialize)]
struct SchemaLoadResponse {
    message: String,
    schema_info: String,
}

async fn handle_load_schema(
    State(state): State<AppState>,
) -> Result<Json<SchemaLoadResponse>, AppError> {
    let mut session = state.session.lock().await;
    let (conn, kind) = session
        .require_connection()
        .map_err(|e| bad_request(e.to_string()))?;

    let doc = introspect::load_schema(conn, kind)
        .await
        .map_err(|e| internal_error(format!("Failed to load database schema: {:#}", e)))?;

    let path = &state.config.store.schema_path;
    introspect::save_schema(&doc, path).map_err(|e| internal_error(format!("{:#}", e)))?;
    session.schema_loaded();

    Ok(Json(SchemaLoadResponse {
        message: "Database schema loaded successfully".to_string(),
        schema_info: format!("Schema documentation generated in '{}'", path.display()),
    }))
}

// ============ POST /load-metadata/ ============

#[derive(Serialize)]
struct MetadataLoadResponse {
    message: String,
    metadata_info: String,
}

async fn handle_load_metadata(
    State(state): State<AppState>,
) -> Result<Json<MetadataLoadResponse>, AppError> {
    let doc = metadata::load_metadata(&state.config.metadata)
        .map_err(|e| internal_error(format!("Failed to load metadata: {:#}", e)))?;

    let path = &state.config.store.metadata_path;
    metadata::save_metadata(&doc, path).map_err(|e| internal_error(format!("{:#}", e)))?;

    Ok(Json(MetadataLoadResponse {
        message: "Metadata loaded successfully".to_string(),
        metadata_info: format!("Metadata documentation generated in '{}'", path.display()),
    }))
}

// ============ POST /create-vector-store/ ============

#[derive(Serialize)]
struct StoreResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

async fn handle_create_vector_store(
    State(state): State<AppState>,
) -> Result<Json<StoreResponse>, AppError> {
    {
        let session = state.session.lock().await;
        session
            .require_schema_loaded()
            .map_err(|e| bad_request(e.to_string()))?;
    }

    let schema_path = &state.config.store.schema_path;
    if !schema_path.exists() {
        return Err(bad_request(
            "Database schema not loaded. Please load schema first.",
        ));
    }
    let schema = introspect::load_schema_file(schema_path)
        .map_err(|e| internal_error(format!("{:#}", e)))?;

    let metadata_path = &state.config.store.metadata_path;
    let metadata_doc = if metadata_path.exists() {
        Some(
            metadata::load_metadata_file(metadata_path)
                .map_err(|e| internal_error(format!("{:#}", e)))?,
        )
    } else {
        None
    };

    let report = store::build_store(&state.config, Some(&schema), metadata_doc.as_ref())
        .await
        .map_err(|e| internal_error(format!("Failed to create vector store: {:#}", e)))?;

    match report {
        Some(_) => {
            let mut session = state.session.lock().await;
            session.context_ready();
            Ok(Json(StoreResponse {
                message: "Vector store created successfully".to_string(),
                path: Some(state.config.store.dir.display().to_string()),
            }))
        }
        None => Ok(Json(StoreResponse {
            message: "No content available to index; vector store not created".to_string(),
            path: None,
        })),
    }
}

// ============ POST /generate-query/ ============

#[derive(Deserialize)]
struct GenerateRequest {
    question: String,
    #[serde(default = "default_conversation_id")]
    conversation_id: String,
}

fn default_conversation_id() -> String {
    "default".to_string()
}

/// Streams generation progress as SSE. Each event's data is a JSON
/// object `{"event": ..., "data": ...}`; the terminal event is either
/// `sql_query` or `error`.
async fn handle_generate_query(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let kind = {
        let session = state.session.lock().await;
        let (_, kind) = session
            .require_connection()
            .map_err(|e| bad_request(e.to_string()))?;
        session
            .require_schema_loaded()
            .map_err(|e| bad_request(e.to_string()))?;
        kind
    };

    let (mut tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let _ = run_generation(&state, &request, kind, &mut tx).await;
    });

    Ok(Sse::new(rx).keep_alive(KeepAlive::default()))
}

async fn run_generation(
    state: &AppState,
    request: &GenerateRequest,
    kind: DbKind,
    tx: &mut mpsc::Sender<Result<Event, Infallible>>,
) -> Result<(), mpsc::SendError> {
    // Generation needs a built store; report its absence as a stream
    // event rather than an HTTP error so the client contract stays
    // uniform once the stream opens.
    let store_db = state.config.store.dir.join(db::STORE_DB_FILE);
    if !store_db.exists() {
        tx.send(Ok(sse_event(
            "error",
            "Vector store not found. Please call /create-vector-store/ endpoint first.",
        )))
        .await?;
        return Ok(());
    }

    tx.send(Ok(sse_event("status", "Analyzing schema..."))).await?;

    {
        let mut session = state.session.lock().await;
        session.begin_generation();
    }

    let history = {
        let chats = state.chats.lock().await;
        chats.history(&request.conversation_id).to_vec()
    };

    let result = generate::generate_sql(&state.config, &request.question, &history, kind).await;

    {
        let mut session = state.session.lock().await;
        session.end_generation();
    }

    if generate::is_error_text(&result) {
        tx.send(Ok(sse_event("error", &result))).await?;
    } else {
        {
            let mut chats = state.chats.lock().await;
            chats.append_exchange(&request.conversation_id, &request.question, &result);
        }
        tx.send(Ok(sse_event("sql_query", &result))).await?;
    }

    Ok(())
}

fn sse_event(event: &str, data: &str) -> Event {
    let payload = serde_json::json!({ "event": event, "data": data });
    Event::default().data(payload.to_string())
}

// ============ POST /execute-query/ ============

#[derive(Deserialize)]
struct ExecuteRequest {
    sql_query: String,
}

#[derive(Serialize)]
struct ExecuteResponse {
    results: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execution is allowed as soon as a connection exists; it does not
/// require loaded schema or a built store. SQL faults come back inside
/// the response body, not as HTTP errors.
async fn handle_execute_query(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, AppError> {
    let session = state.session.lock().await;
    let (conn, _) = session
        .require_connection()
        .map_err(|e| bad_request(e.to_string()))?;

    let outcome = conn.execute(&request.sql_query).await;
    let results = format_results(&outcome);

    Ok(Json(ExecuteResponse {
        results,
        error: outcome.error,
    }))
}
