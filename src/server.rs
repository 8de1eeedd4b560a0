//! Local HTTP surface for presentation clients.
//!
//! A panel or tray app polls `GET /context` (every couple of seconds) and
//! `GET /key-events`, and can push text through `POST /analyze`.
//!
//! ```text
//! panel ──→ GET /context ──→ ContextStore snapshot
//!       ──→ POST /analyze ─→ ContextAggregator (force path) ──→ LLM
//! ```
//!
//! The server binds to 127.0.0.1 only.

use crate::analysis::AnalysisError;
use crate::context::{AnalysisHandle, ContextStore, CycleOutcome, MergeReport, SkipCause};
use crate::core::{BufferStats, ContextState, FrameRecord, KeyEvent, TimeWindowBuffer};
use crate::extraction::{TextHistory, TextStats};
use crate::pipeline::Pipeline;
use crate::transparency::{SharedTransparencyLog, TransparencyStats};
use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

const DEFAULT_KEY_EVENT_MINUTES: u64 = 5;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Handles to the pipeline state the routes read.
#[derive(Clone)]
pub struct ServerState {
    store: Arc<ContextStore>,
    analysis: AnalysisHandle,
    history: TextHistory,
    frames: Arc<TimeWindowBuffer<FrameRecord>>,
    log: SharedTransparencyLog,
}

impl ServerState {
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        Self {
            store: pipeline.store(),
            analysis: pipeline.analysis_handle(),
            history: pipeline.text_history(),
            frames: pipeline.frame_source().buffer(),
            log: pipeline.log(),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyEventsQuery {
    pub minutes: Option<u64>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub transparency: TransparencyStats,
    pub frames: BufferStats,
    pub text: TextStats,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub text: String,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub status: String,
    pub merge: MergeReport,
    pub context: ContextState,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /context
async fn context(State(state): State<Arc<ServerState>>) -> Json<ContextState> {
    Json(state.store.get_snapshot())
}

/// GET /key-events?minutes=N
async fn key_events(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<KeyEventsQuery>,
) -> Json<Vec<KeyEvent>> {
    let minutes = query.minutes.unwrap_or(DEFAULT_KEY_EVENT_MINUTES);
    let window = Duration::from_secs(minutes.saturating_mul(60));
    Json(state.store.get_recent_key_events(window))
}

/// GET /stats
async fn stats(State(state): State<Arc<ServerState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        transparency: state.log.stats(),
        frames: state.frames.stats(),
        text: state.history.stats(),
    })
}

/// POST /analyze
///
/// Runs one analysis on the posted text right away.
async fn analyze(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    match state.analysis.force_analyze(&request.text).await {
        CycleOutcome::Merged(merge) => Ok(Json(AnalyzeResponse {
            status: "ok".to_string(),
            merge,
            context: state.store.get_snapshot(),
        })),
        CycleOutcome::Skipped(SkipCause::BlankText) => Err(api_error(
            StatusCode::BAD_REQUEST,
            "EMPTY_TEXT",
            "text is empty",
        )),
        CycleOutcome::Skipped(SkipCause::NoAnalyzer) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "NO_PROVIDER",
            "no analysis provider is configured",
        )),
        CycleOutcome::Abandoned(e @ AnalysisError::Transport(_)) => {
            tracing::warn!("analysis request failed: {e}");
            Err(api_error(StatusCode::BAD_GATEWAY, "ANALYSIS_TRANSPORT", e.to_string()))
        }
        CycleOutcome::Abandoned(e @ AnalysisError::Parse(_)) => {
            tracing::warn!("analysis reply rejected: {e}");
            Err(api_error(StatusCode::BAD_GATEWAY, "ANALYSIS_PARSE", e.to_string()))
        }
    }
}

/// Build the router over `state`.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/context", get(context))
        .route("/key-events", get(key_events))
        .route("/stats", get(stats))
        .route("/analyze", post(analyze))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::new(state))
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    state: ServerState,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Context server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
