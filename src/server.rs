//! Read-only HTTP API over stored receipts.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/receipts?limit=N` | Newest receipts first, as summaries (default 50, max 500) |
//! | `GET`  | `/receipts/{id}` | Full record with stored JSON artifacts parsed back into JSON |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "receipt not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser-based
//! review UI can be served from anywhere.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use receipt_trace_core::store::{ReceiptStore, ReceiptSummary};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn ReceiptStore>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store: Arc<dyn ReceiptStore> = Arc::new(SqliteStore::new(pool));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("Receipt API listening on http://{}", config.server.bind);
    tracing::info!(bind = %config.server.bind, "server started");

    axum::serve(listener, router(store)).await?;
    Ok(())
}

/// Build the API router over any [`ReceiptStore`].
pub fn router(store: Arc<dyn ReceiptStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/receipts", get(handle_list))
        .route("/receipts/{id}", get(handle_get))
        .layer(cors)
        .with_state(AppState { store })
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

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(err: impl std::fmt::Display) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: err.to_string(),
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

// ============ GET /receipts ============

#[derive(Deserialize)]
struct ListParams {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct ListResponse {
    receipts: Vec<ReceiptSummary>,
}

async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(bad_request(format!(
            "limit must be between 1 and {}",
            MAX_LIST_LIMIT
        )));
    }
    let receipts = state.store.list(limit).await.map_err(internal)?;
    Ok(Json(ListResponse { receipts }))
}

// ============ GET /receipts/{id} ============

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id: i64 = id
        .parse()
        .map_err(|_| bad_request(format!("invalid receipt id: {}", id)))?;
    match state.store.get(id).await.map_err(internal)? {
        Some(record) => Ok(Json(record.to_json())),
        None => Err(not_found(format!("receipt not found: {}", id))),
    }
}
