//! HTTP server for the study-notes service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Multipart upload: `collection_name` + `files` |
//! | `POST` | `/chat` | JSON `{question}` → `text/event-stream` answer |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "no files were uploaded" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401),
//! `extraction_failed` (422), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::backend::BackendService;
use crate::chat::ChatClient;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::models::UploadedFile;
use crate::pipeline::{Pipeline, UploadError};
use crate::retrieval::{build_context, retrieve, source_names};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    backend: Arc<dyn BackendService>,
    embedder: Arc<Embedder>,
    chat: Arc<ChatClient>,
    pipeline: Arc<Pipeline>,
}

/// Starts the HTTP server on `[server].bind`; runs until the process is
/// terminated.
pub async fn run_server(
    config: &Config,
    backend: Arc<dyn BackendService>,
    embedder: Arc<Embedder>,
    chat: Arc<ChatClient>,
    pipeline: Arc<Pipeline>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        config: Arc::new(config.clone()),
        backend,
        embedder,
        chat,
        pipeline,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/upload", post(handle_upload))
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %bind_addr, "server listening");

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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Validation(message) => bad_request(message),
            UploadError::NoTextExtracted(failures) => {
                let detail = failures
                    .iter()
                    .map(|f| format!("{}: {}", f.file_name, f.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                AppError {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    code: "extraction_failed".to_string(),
                    message: format!("no text could be extracted from any file ({detail})"),
                }
            }
            UploadError::Backend(err) => internal(err.to_string()),
        }
    }
}

/// Resolve the request's bearer token to a user id, or 401.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| unauthorized("missing bearer token"))?;

    state
        .backend
        .authenticate(token)
        .await
        .map_err(|e| unauthorized(e.to_string()))
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

// ============ POST /upload ============

/// Handler for `POST /upload`.
///
/// Multipart body with a `collection_name` text field and one or more
/// `files` parts. Per-file extraction failures are itemized in the
/// response; the request fails only if no file yields text.
async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = authenticate(&state, &headers).await?;

    let mut collection_name = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(String::from);
        match name.as_deref() {
            Some("collection_name") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid collection_name: {e}")))?;
                collection_name = Some(value);
            }
            Some("files") => {
                let file_name = field
                    .file_name()
                    .map(String::from)
                    .ok_or_else(|| bad_request("file part is missing a filename"))?;
                let content_type = field
                    .content_type()
                    .map(String::from)
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("could not read file {file_name}: {e}")))?;
                files.push(UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let collection_name =
        collection_name.ok_or_else(|| bad_request("collection_name field is required"))?;
    if collection_name.trim().is_empty() {
        return Err(bad_request("collection_name must not be empty"));
    }

    let outcome = state
        .pipeline
        .upload(&user_id, &collection_name, files)
        .await?;

    Ok(Json(serde_json::to_value(&outcome).map_err(|e| internal(e.to_string()))?))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
}

/// Handler for `POST /chat`.
///
/// Embeds the question, retrieves the user's best-matching chunks, and
/// streams the grounded answer as `data: <json>` SSE events. The stream
/// carries its own error events; HTTP-level errors occur only before
/// streaming starts.
async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let user_id = authenticate(&state, &headers).await?;

    if request.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let query = state.embedder.embed(&request.question).await;
    let chunks = retrieve(&state.backend, &user_id, &query, &state.config.retrieval).await;
    let context = build_context(&chunks);
    let sources = source_names(&chunks);

    let events = state
        .chat
        .stream_answer(request.question, context, sources)
        .map(|event| {
            let payload =
                serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Ok::<_, Infallible>(Event::default().data(payload))
        });

    Ok(Sse::new(events))
}
