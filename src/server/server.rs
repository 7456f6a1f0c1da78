use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::metrics::metrics_handler;
use super::state::{GuardedOrchestrator, ServerState};
use super::{log_requests, ServerConfig};
use crate::exporter::ExportError;
use crate::orchestrator::{InvocationSummary, InvokeError, Role};

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Serialize)]
struct StatusResponse {
    identity: String,
    role: Role,
    leader: Option<String>,
    export_in_progress: bool,
    last_invocation: Option<InvocationSummary>,
    uptime: String,
    hash: String,
}

async fn health() -> StatusCode {
    StatusCode::OK
}

fn invoke_error_status(err: &InvokeError) -> StatusCode {
    match err {
        InvokeError::Busy => StatusCode::CONFLICT,
        InvokeError::Export(ExportError::RemoteRejected { .. })
        | InvokeError::Export(ExportError::TransportFailure(_)) => StatusCode::BAD_GATEWAY,
        InvokeError::Export(ExportError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
        InvokeError::Export(ExportError::ConfigInvalid(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn trigger_export(State(orchestrator): State<GuardedOrchestrator>) -> Response {
    match orchestrator.on_demand_invoke().await {
        Ok(output) => Json(output).into_response(),
        Err(err) => (invoke_error_status(&err), format!("{}\n", err)).into_response(),
    }
}

async fn get_status(State(state): State<ServerState>) -> Json<StatusResponse> {
    let orchestrator = &state.orchestrator;
    Json(StatusResponse {
        identity: orchestrator.identity().to_string(),
        role: orchestrator.role(),
        leader: orchestrator.current_leader(),
        export_in_progress: orchestrator.is_busy(),
        last_invocation: orchestrator.last_invocation(),
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    })
}

pub fn make_app(config: ServerConfig, orchestrator: GuardedOrchestrator) -> Router {
    let state = ServerState::new(config, orchestrator);

    let api_routes: Router = Router::new()
        .route("/export", post(trigger_export))
        .route("/status", get(get_status))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn_with_state(state, log_requests))
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn serve(app: Router, port: u16, label: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind {} server on port {}", label, port))?;
    info!("{} server listening on port {}", label, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .with_context(|| format!("{} server failed", label))
}

/// Serve the request gateway until `shutdown` is cancelled.
pub async fn run_server(
    config: ServerConfig,
    orchestrator: GuardedOrchestrator,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    serve(make_app(config, orchestrator), port, "HTTP", shutdown).await
}

/// Serve Prometheus metrics until `shutdown` is cancelled.
pub async fn run_metrics_server(port: u16, shutdown: CancellationToken) -> Result<()> {
    serve(make_metrics_app(), port, "Metrics", shutdown).await
}
