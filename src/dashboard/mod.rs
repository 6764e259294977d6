//! Read-only HTTP view of the dispatcher's registry and ledger.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::scheduler::ledger::{CommitStatus, DispatchedCommit, PendingCommit};
use crate::scheduler::registry::RunnerState;
use crate::scheduler::SchedulerState;

#[derive(Clone)]
pub struct DashboardState {
    pub state: SchedulerState,
}

#[derive(Serialize)]
struct CommitsResponse {
    pending: Vec<PendingCommit>,
    dispatched: Vec<DispatchedCommit>,
    completed_total: u64,
}

#[derive(Serialize)]
struct CommitStatusResponse {
    commit_id: String,
    #[serde(flatten)]
    status: CommitStatus,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/runners", get(list_runners_handler))
        .route("/api/commits", get(list_commits_handler))
        .route("/api/commits/:commit_id", get(commit_status_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: String, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn list_runners_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let registry = state.state.registry.read().await;
    let runners: Vec<RunnerState> = registry.all_runners().to_vec();
    Json(runners)
}

async fn list_commits_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let ledger = state.state.ledger.read().await;
    Json(CommitsResponse {
        pending: ledger.pending_commits().cloned().collect(),
        dispatched: ledger.dispatched_commits().into_iter().cloned().collect(),
        completed_total: ledger.completed_total(),
    })
}

async fn commit_status_handler(
    State(state): State<DashboardState>,
    Path(commit_id): Path<String>,
) -> impl IntoResponse {
    let ledger = state.state.ledger.read().await;
    match ledger.status(&commit_id) {
        Some(status) => (
            StatusCode::OK,
            Json(CommitStatusResponse { commit_id, status }),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Unknown commit {}", commit_id),
            }),
        )
            .into_response(),
    }
}
