//! HTTP API.
//!
//! Serves parsed content, persisted blocks and diagnostics, and lets a
//! client trigger a sync for one code.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/content/{code}` | Live-parsed document, store fallback |
//! | `GET`  | `/blocks/{code}?stage=&module=` | Persisted blocks |
//! | `GET`  | `/diagnose/{code}` | Diagnostic report |
//! | `POST` | `/sync/{code}` | Sync one code |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no document found for code C1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `ambiguous` (409),
//! `empty_parse` (422), `timeout` (408), `io` / `store` / `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::content::{ContentService, ParsedContent};
use crate::diagnose::{diagnose, DiagnosticReport};
use crate::error::ContentError;
use crate::locator::FileLocator;
use crate::models::{ContentBlockRecord, ModuleCode, StageId};
use crate::store::{BlockStore, SqliteBlockStore};
use crate::sync::{SyncOptions, SyncOutcome, Synchronizer};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    locator: FileLocator,
    store: Arc<dyn BlockStore>,
    content: Arc<ContentService>,
    sync: Arc<Synchronizer>,
}

impl AppState {
    pub fn new(locator: FileLocator, store: Arc<dyn BlockStore>, sync_options: SyncOptions) -> Self {
        Self {
            content: Arc::new(ContentService::with_store(locator.clone(), store.clone())),
            sync: Arc::new(Synchronizer::new(locator.clone(), store.clone(), sync_options)),
            locator,
            store,
        }
    }
}

/// Build the router with all routes and CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/content/{code}", get(handle_content))
        .route("/blocks/{code}", get(handle_blocks))
        .route("/diagnose/{code}", get(handle_diagnose))
        .route("/sync/{code}", post(handle_sync))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = SqliteBlockStore::open(config).await?;
    let locator = FileLocator::from_config(&config.content)?;
    let options = SyncOptions {
        timeout: Duration::from_secs(config.sync.timeout_secs),
        ..SyncOptions::default()
    };
    let app = router(AppState::new(locator, Arc::new(store), options));

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, content_dir = %config.content.dir.display(), "server listening");
    println!("kpb server listening on http://{}", bind_addr);
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
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }
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

impl From<ContentError> for AppError {
    fn from(err: ContentError) -> Self {
        let status = match &err {
            ContentError::NotFound(_) => StatusCode::NOT_FOUND,
            ContentError::Ambiguous { .. } => StatusCode::CONFLICT,
            ContentError::EmptyParse { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ContentError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            ContentError::Io { .. } | ContentError::Store(_) | ContentError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(kind = err.kind(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.kind().to_string(),
            message: err.to_string(),
        }
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

// ============ GET /content/{code} ============

async fn handle_content(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ParsedContent>, AppError> {
    let content = state.content.get_content_or_stored(&code).await?;
    Ok(Json(content))
}

// ============ GET /blocks/{code} ============

/// Query parameters for `GET /blocks/{code}`.
#[derive(Debug, Default, Deserialize)]
pub struct BlocksQuery {
    pub stage: Option<String>,
    pub module: Option<String>,
}

impl BlocksQuery {
    fn parse(&self) -> Result<(Option<StageId>, Option<ModuleCode>), AppError> {
        let stage = non_empty(&self.stage)
            .map(|s| s.parse::<StageId>())
            .transpose()
            .map_err(bad_request)?;
        let module = non_empty(&self.module)
            .map(|m| m.parse::<ModuleCode>())
            .transpose()
            .map_err(bad_request)?;
        Ok((stage, module))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Serialize)]
struct BlocksResponse {
    code: String,
    blocks: Vec<ContentBlockRecord>,
}

async fn handle_blocks(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<BlocksQuery>,
) -> Result<Json<BlocksResponse>, AppError> {
    let (stage, module) = query.parse()?;
    let blocks = state.content.get_blocks(&code, stage, module).await?;
    Ok(Json(BlocksResponse {
        code: crate::fingerprint::normalize_code(&code),
        blocks,
    }))
}

// ============ GET /diagnose/{code} ============

async fn handle_diagnose(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Json<DiagnosticReport> {
    Json(diagnose(&state.locator, state.store.as_ref(), &code).await)
}

// ============ POST /sync/{code} ============

async fn handle_sync(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<SyncOutcome>, AppError> {
    if code.trim().is_empty() {
        return Err(bad_request("code must not be empty"));
    }
    let outcome = state.sync.sync_one_bounded(&code).await?;
    Ok(Json(outcome))
}
