//! HTTP request handlers

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, AppState};
use crate::broadcaster::{BroadcasterState, BroadcasterStats};
use crate::event::{Event, Publisher};
use crate::probe::DockerStatus;
use crate::snapshot::{Snapshot, Timestamp};
use crate::store::{updates_from_json, EnvMap};

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>DevEnv Monitor</title>
  <style>
    body { font-family: sans-serif; max-width: 720px; margin: 40px auto; color: #222; }
    code { background: #f2f2f2; padding: 2px 4px; border-radius: 3px; }
    li { margin: 6px 0; }
  </style>
</head>
<body>
  <h1>DevEnv Monitor</h1>
  <p>Backend for the remote development environment dashboard.</p>
  <h3>API endpoints</h3>
  <ul>
    <li><code>GET /api/health</code> service health</li>
    <li><code>GET /api/metrics</code> latest system metrics with Docker and SSH status</li>
    <li><code>GET /api/metrics/history?limit=N</code> recent metrics, oldest first</li>
    <li><code>GET /api/config</code> / <code>POST /api/config</code> environment configuration</li>
    <li><code>GET /api/status</code> service overview</li>
    <li><code>GET /ws</code> live updates over WebSocket</li>
  </ul>
</body>
</html>
"#;

pub(super) async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Debug, Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    timestamp: Timestamp,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Timestamp::now(),
    })
}

// ----------------------------------------------------------------------------
// Metrics
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(super) struct MetricsResponse {
    system: Arc<Snapshot>,
    docker: DockerStatus,
    ssh_connected: bool,
}

/// Newest history entry, or a fresh capture before the first cycle lands.
async fn current_snapshot(state: &AppState) -> Result<Arc<Snapshot>, ApiError> {
    match state.history.latest() {
        Some(snapshot) => Ok(snapshot),
        None => {
            debug!(target: "devenv::gateway", "History empty, capturing on demand");
            Ok(Arc::new(state.capture().await?))
        }
    }
}

pub(super) async fn metrics(State(state): State<AppState>) -> Result<Json<MetricsResponse>, ApiError> {
    let host = state.store.remote_host();
    let (system, probes) = tokio::join!(current_snapshot(&state), state.prober.report(host.as_deref()));

    Ok(Json(MetricsResponse {
        system: system?,
        docker: probes.docker,
        ssh_connected: probes.ssh_connected,
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    limit: Option<usize>,
}

pub(super) async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<Arc<Snapshot>>> {
    let limit = query
        .limit
        .unwrap_or(state.query_limit)
        .min(state.history.capacity());
    Json(state.history.recent(limit))
}

// ----------------------------------------------------------------------------
// Config
// ----------------------------------------------------------------------------

pub(super) async fn get_config(State(state): State<AppState>) -> Json<Arc<EnvMap>> {
    Json(state.store.snapshot())
}

#[derive(Debug, Serialize)]
pub(super) struct UpdateResponse {
    success: bool,
    message: &'static str,
}

pub(super) async fn update_config(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let updates = updates_from_json(&body)?;
    let applied = state.store.merge(updates).await?;

    if let Err(e) = state.bus.publish(&Event::ConfigUpdated(applied)) {
        warn!(target: "devenv::gateway", error = %e, "Failed to announce config update");
    }

    Ok(Json(UpdateResponse {
        success: true,
        message: "Configuration updated",
    }))
}

// ----------------------------------------------------------------------------
// Status
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(super) struct BroadcasterStatus {
    state: BroadcasterState,
    #[serde(flatten)]
    stats: BroadcasterStats,
}

#[derive(Debug, Serialize)]
pub(super) struct HostInfo {
    hostname: Option<String>,
    /// Seconds since boot
    uptime: u64,
}

#[derive(Debug, Serialize)]
pub(super) struct StatusResponse {
    server_time: Timestamp,
    config_loaded: bool,
    docker: DockerStatus,
    ssh_connected: bool,
    metrics_history_count: usize,
    subscribers: usize,
    broadcaster: Option<BroadcasterStatus>,
    /// Seconds since the service started
    uptime: u64,
    host: HostInfo,
}

pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let host = state.store.remote_host();
    let probes = state.prober.report(host.as_deref()).await;

    Json(StatusResponse {
        server_time: Timestamp::now(),
        config_loaded: state.store.is_loaded(),
        docker: probes.docker,
        ssh_connected: probes.ssh_connected,
        metrics_history_count: state.history.len(),
        subscribers: state.bus.subscriber_count(),
        broadcaster: state.broadcaster.as_ref().map(|monitor| BroadcasterStatus {
            state: monitor.state(),
            stats: monitor.stats(),
        }),
        uptime: state.started_at.elapsed().as_secs(),
        host: HostInfo {
            hostname: sysinfo::System::host_name(),
            uptime: sysinfo::System::uptime(),
        },
    })
}
