//! HTTP server for learn submissions.
//!
//! Provides REST API endpoints for:
//! - Health checks
//! - Queueing a learn operation after the controller has been put in learn mode
//! - Listing pending operations

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::SubmitError;
use crate::resolver::DestinationHint;
use crate::service::{LearnRequest, LearnService};
use crate::types::{CleanupTarget, CommandKind, Destination, OriginKey};

/// Server state shared across handlers.
pub struct ServerState {
    pub service: LearnService,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/learn", post(learn_handler))
        .route("/api/pending", get(pending_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and serve until `shutdown` completes.
pub async fn run_server<F>(state: Arc<ServerState>, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Learner server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Body of `POST /api/learn`.
#[derive(Debug, Deserialize)]
pub struct LearnBody {
    /// Device name the controller files the code under.
    pub device_name: String,
    pub command_name: String,
    /// Destination hint. Defaults to `device_name`.
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub shard: Option<String>,
    #[serde(default)]
    pub kind: CommandKind,
    /// Delete the controller's copy once stored.
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default)]
    pub cleanup_shard: Option<String>,
}

impl From<LearnBody> for LearnRequest {
    fn from(body: LearnBody) -> Self {
        let hint = DestinationHint {
            device_name: body
                .destination
                .unwrap_or_else(|| body.device_name.clone()),
            platform: body.platform,
        };
        let mut request = LearnRequest::new(
            OriginKey::new(body.device_name, body.command_name),
            hint,
        )
        .with_kind(body.kind);
        if body.cleanup {
            request = request.with_cleanup(CleanupTarget {
                shard: body.cleanup_shard,
            });
        }
        if let Some(shard) = body.shard {
            request = request.with_shard(shard);
        }
        request
    }
}

/// One row of `GET /api/pending`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingView {
    pub key: OriginKey,
    pub destination: Destination,
    pub submitted_at: DateTime<Utc>,
    pub elapsed_secs: u64,
    pub fallback_attempted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn learn_handler(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<LearnBody>,
) -> Response {
    match state.service.submit(body.into()).await {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(accepted)).into_response(),
        Err(SubmitError::AmbiguousDestination { hint, candidates }) => {
            warn!(hint = %hint, candidates, "Learn rejected: ambiguous destination");
            (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "ambiguous_destination",
                    "hint": hint,
                    "candidates": candidates,
                })),
            )
                .into_response()
        }
        Err(SubmitError::DestinationGone(destination)) => (
            StatusCode::GONE,
            Json(json!({ "error": "destination_gone", "destination": destination })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Learn submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn pending_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let now = Instant::now();
    let mut pending: Vec<PendingView> = state
        .service
        .registry()
        .snapshot()
        .into_iter()
        .map(|op| PendingView {
            elapsed_secs: op.elapsed(now).as_secs(),
            key: op.origin_key,
            destination: op.destination,
            submitted_at: op.submitted_at,
            fallback_attempted: op.fallback_attempted,
        })
        .collect();
    pending.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
    Json(pending)
}
