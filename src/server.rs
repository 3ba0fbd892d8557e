use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::config::{Config, ServerSettings, StoreKind};
use crate::errors::RouteError;
use crate::generator;
use crate::github::GitHubClient;
use crate::idempotency::{IdempotencyTracker, MemoryStore, SqliteStore};
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::webhook::{WebhookHeaders, WebhookRouter};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub router: WebhookRouter,
    pub pipeline: Pipeline,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(router: WebhookRouter, pipeline: Pipeline) -> SharedState {
        Arc::new(Self { router, pipeline })
    }

    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: &Config) -> Result<SharedState> {
        let github = Arc::new(GitHubClient::from_config(config)?);
        let generator = generator::from_config(&config.generator)
            .context("Failed to set up code generator")?;
        let tracker = tracker_from_config(config)?;
        let pipeline = Pipeline::new(generator, github.clone(), tracker, config.pipeline.clone())
            .with_context_provider(github);
        let router = WebhookRouter::new(config.webhook.secret.clone())
            .with_trigger_token(config.webhook.trigger_token.clone())
            .with_trigger_label(config.webhook.trigger_label.clone());
        Ok(Self::new(router, pipeline))
    }
}

/// Build the idempotency tracker for the configured store.
pub fn tracker_from_config(config: &Config) -> Result<IdempotencyTracker> {
    match config.idempotency.store {
        StoreKind::Memory => Ok(IdempotencyTracker::new(Arc::new(MemoryStore::new()))),
        StoreKind::Sqlite => {
            let path = &config.idempotency.db_path;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory {}", parent.display())
                })?;
            }
            let store = SqliteStore::open(path)?;
            tracing::info!(path = %path.display(), "using SQLite idempotency store");
            Ok(IdempotencyTracker::new(Arc::new(store)))
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    Internal(String),
}

impl From<RouteError> for ApiError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::Auth(_) => ApiError::Unauthorized(err.to_string()),
            RouteError::MalformedPayload(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn handle_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PipelineOutcome>, ApiError> {
    let headers = WebhookHeaders::from_header_map(&headers);
    let event = state.router.route(&headers, &body).map_err(|e| {
        tracing::warn!(
            delivery = headers.delivery.as_deref().unwrap_or("-"),
            error = %e,
            "rejected webhook delivery"
        );
        ApiError::from(e)
    })?;
    let outcome = state.pipeline.process(event).await.map_err(|e| {
        tracing::error!(error = %e, "pipeline fault");
        ApiError::Internal(e.to_string())
    })?;
    Ok(Json(outcome))
}

/// Bind and serve until Ctrl+C.
pub async fn start_server(state: SharedState, settings: &ServerSettings) -> Result<()> {
    if !state.router.verifies_signatures() && settings.host != "127.0.0.1" {
        tracing::warn!(host = %settings.host, "serving unauthenticated webhooks on a non-loopback address");
    }
    let app = build_router(state);
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!("issue2pr listening on http://{}/webhook", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
