// ============================================================================
// GATEWAY
// ============================================================================
// HTTP pull endpoints and the WebSocket push channel:
//
//   GET  /                      static index
//   GET  /api/health            liveness
//   GET  /api/metrics           latest snapshot + docker/ssh probes
//   GET  /api/metrics/history   recent snapshots (?limit=)
//   GET  /api/config            env-file map
//   POST /api/config            merge + persist env-file keys
//   GET  /api/status            service overview
//   GET  /ws                    live events
// ============================================================================

mod handlers;
mod ws;

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::broadcaster::BroadcasterMonitor;
use crate::error::{CaptureError, CaptureResult, ServerError, StoreError};
use crate::event::EventBus;
use crate::history::HistoryBuffer;
use crate::probe::Prober;
use crate::provider::SnapshotProvider;
use crate::snapshot::Snapshot;
use crate::store::ConfigStore;

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

/// Everything a request handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub history: Arc<HistoryBuffer>,
    pub provider: Arc<dyn SnapshotProvider>,
    pub bus: EventBus,
    pub store: Arc<ConfigStore>,
    pub prober: Arc<Prober>,
    pub broadcaster: Option<BroadcasterMonitor>,
    /// Default `?limit=` for the history endpoint
    pub query_limit: usize,
    /// Bound on on-demand captures
    pub capture_timeout: Duration,
    pub started_at: Instant,
    /// Cancelled when the service stops; open sockets close on it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        history: Arc<HistoryBuffer>,
        provider: Arc<dyn SnapshotProvider>,
        bus: EventBus,
        store: Arc<ConfigStore>,
        prober: Arc<Prober>,
    ) -> Self {
        Self {
            history,
            provider,
            bus,
            store,
            prober,
            broadcaster: None,
            query_limit: crate::DEFAULT_HISTORY_QUERY_LIMIT,
            capture_timeout: Duration::from_secs(crate::DEFAULT_CAPTURE_TIMEOUT_SECS),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_broadcaster(mut self, monitor: BroadcasterMonitor) -> Self {
        self.broadcaster = Some(monitor);
        self
    }

    pub fn with_query_limit(mut self, limit: usize) -> Self {
        self.query_limit = limit.max(1);
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Capture outside the broadcaster. Not appended to history.
    pub async fn capture(&self) -> CaptureResult<Snapshot> {
        tokio::time::timeout(self.capture_timeout, self.provider.capture())
            .await
            .map_err(|_| CaptureError::timeout(self.capture_timeout))?
    }
}

impl Debug for AppState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("history", &self.history)
            .field("provider", &self.provider.name())
            .field("bus", &self.bus)
            .field("store", &self.store)
            .field("query_limit", &self.query_limit)
            .field("capture_timeout", &self.capture_timeout)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Error Responses
// ----------------------------------------------------------------------------

/// Request-path failure rendered as `{ "error": ... }`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Store(StoreError),
    Capture(CaptureError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<CaptureError> for ApiError {
    fn from(e: CaptureError) -> Self {
        ApiError::Capture(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Store(e) if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Store(e) => {
                error!(target: "devenv::gateway", error = %e, "Config store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Capture(e) => {
                error!(target: "devenv::gateway", error = %e, "On-demand capture failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ----------------------------------------------------------------------------
// Router & Server
// ----------------------------------------------------------------------------

/// Build the router with all endpoints.
pub fn router(state: AppState, cors: bool) -> Router {
    let router = Router::new()
        .route("/", get(handlers::index))
        .route("/api/health", get(handlers::health))
        .route("/api/metrics", get(handlers::metrics))
        .route("/api/metrics/history", get(handlers::history))
        .route("/api/config", get(handlers::get_config).post(handlers::update_config))
        .route("/api/status", get(handlers::status))
        .route("/ws", get(ws::upgrade))
        .layer(TraceLayer::new_for_http());

    let router = if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}

/// Bind the listening socket.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        address: addr.to_string(),
        source,
    })
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(target: "devenv::gateway", %addr, "Gateway listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)?;

    info!(target: "devenv::gateway", "Gateway stopped");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::error::CaptureResult;
    use crate::snapshot::{DiskUsage, MemoryUsage, Snapshot, Timestamp};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    /// Returns a fixed snapshot and counts captures
    #[derive(Debug, Default)]
    pub(crate) struct FixedProvider {
        pub(crate) captures: AtomicUsize,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl SnapshotProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn capture(&self) -> CaptureResult<Snapshot> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CaptureError::Unavailable {
                    message: "no counters".into(),
                });
            }
            Ok(Snapshot::new(Timestamp::from_secs(1_700_000_000))
                .with_cpu(42.0)
                .with_memory(MemoryUsage::new(1000, 250))
                .with_disk(DiskUsage::new(2000, 1000)))
        }
    }

    /// Never finishes a capture
    #[derive(Debug)]
    struct StalledProvider;

    #[async_trait]
    impl SnapshotProvider for StalledProvider {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn capture(&self) -> CaptureResult<Snapshot> {
            std::future::pending().await
        }
    }

    fn test_prober() -> Arc<Prober> {
        Arc::new(Prober::new(ProbeConfig {
            docker_command: vec!["sh".into(), "-c".into(), "echo header; echo c1; echo c2".into()],
            docker_timeout: Duration::from_secs(5),
            ping_command: vec!["false".into()],
            ping_timeout: Duration::from_secs(1),
            default_host: "localhost".into(),
        }))
    }

    pub(crate) struct TestApp {
        pub(crate) state: AppState,
        pub(crate) provider: Arc<FixedProvider>,
        pub(crate) _dir: tempfile::TempDir,
    }

    pub(crate) async fn test_app(fail_capture: bool) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("config.env")).await.unwrap();
        let provider = Arc::new(FixedProvider {
            fail: fail_capture,
            ..Default::default()
        });
        let state = AppState::new(
            Arc::new(HistoryBuffer::new(5)),
            provider.clone(),
            EventBus::new(16),
            Arc::new(store),
            test_prober(),
        )
        .with_query_limit(3);
        TestApp {
            state,
            provider,
            _dir: dir,
        }
    }

    fn snap(secs: i64) -> Arc<Snapshot> {
        Arc::new(Snapshot::new(Timestamp::from_secs(secs)).with_cpu(secs as f64))
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone(), true).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(false).await;
        let (status, body) = send(&app.state, get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_index_is_html() {
        let app = test_app(false).await;
        let response = router(app.state.clone(), false).oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/html"));
    }

    #[tokio::test]
    async fn test_metrics_uses_latest_history_entry() {
        let app = test_app(false).await;
        app.state.history.append(snap(1));
        app.state.history.append(snap(2));

        let (status, body) = send(&app.state, get("/api/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["system"]["cpu_percent"], 2.0);
        assert_eq!(body["docker"], json!({ "running": true, "containers": 2 }));
        assert_eq!(body["ssh_connected"], false);
        assert_eq!(app.provider.captures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_metrics_captures_when_history_is_empty() {
        let app = test_app(false).await;
        let (status, body) = send(&app.state, get("/api/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["system"]["cpu_percent"], 42.0);
        assert_eq!(body["system"]["disk"]["percent"], 50.0);
        assert_eq!(app.provider.captures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_metrics_capture_failure_is_500() {
        let app = test_app(true).await;
        let (status, body) = send(&app.state, get("/api/metrics")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("no counters"));
    }

    #[tokio::test]
    async fn test_metrics_stalled_capture_times_out() {
        let app = test_app(false).await;
        let state = AppState {
            provider: Arc::new(StalledProvider),
            ..app.state.clone()
        }
        .with_capture_timeout(Duration::from_millis(200));

        let (status, body) = tokio::time::timeout(Duration::from_secs(5), send(&state, get("/api/metrics")))
            .await
            .expect("request hung");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("timed out after 200ms"));
    }

    #[tokio::test]
    async fn test_history_default_and_limit() {
        let app = test_app(false).await;
        for secs in 1..=5 {
            app.state.history.append(snap(secs));
        }

        let (_, body) = send(&app.state, get("/api/metrics/history")).await;
        let cpu: Vec<f64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["cpu_percent"].as_f64().unwrap())
            .collect();
        assert_eq!(cpu, vec![3.0, 4.0, 5.0]);

        let (_, body) = send(&app.state, get("/api/metrics/history?limit=1")).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["cpu_percent"], 5.0);

        let (_, body) = send(&app.state, get("/api/metrics/history?limit=500")).await;
        assert_eq!(body.as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_history_rejects_bad_limit() {
        let app = test_app(false).await;
        let response = router(app.state.clone(), false)
            .oneshot(get("/api/metrics/history?limit=many"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_config_update_persists_and_broadcasts() {
        let app = test_app(false).await;
        let mut rx = app.state.bus.subscribe();

        let (status, body) = send(
            &app.state,
            post_json("/api/config", r#"{"REMOTE_HOST": "10.0.0.7", "SSH_PORT": 2200}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({ "type": "config_updated", "payload": { "REMOTE_HOST": "10.0.0.7", "SSH_PORT": "2200" } })
        );

        let (status, body) = send(&app.state, get("/api/config")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["REMOTE_HOST"], "10.0.0.7");
        assert_eq!(body["SSH_PORT"], "2200");
        assert_eq!(body["API_PORT"], "5001");

        let on_disk = std::fs::read_to_string(app.state.store.path()).unwrap();
        assert!(on_disk.contains("REMOTE_HOST=10.0.0.7"));
    }

    #[tokio::test]
    async fn test_config_update_rejects_invalid_input() {
        let app = test_app(false).await;

        for body in [r#"{"BAD KEY": "x"}"#, r#"{"KEY": null}"#, r#"[1, 2]"#, "{}", "not json"] {
            let (status, response) = send(&app.state, post_json("/api/config", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert!(response["error"].is_string(), "{body}");
        }

        assert!(app.state.store.snapshot().is_empty());
        assert!(!app.state.store.path().exists());
    }

    #[tokio::test]
    async fn test_config_persist_failure_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(false).await;
        let state = AppState {
            store: Arc::new(ConfigStore::from_map(
                dir.path().join("gone").join("config.env"),
                Default::default(),
            )),
            ..app.state.clone()
        };

        let (status, body) = send(&state, post_json("/api/config", r#"{"A": "1"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("failed to persist"));
        assert!(state.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_status_overview() {
        let app = test_app(false).await;
        app.state.history.append(snap(1));

        let (status, body) = send(&app.state, get("/api/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metrics_history_count"], 1);
        assert_eq!(body["config_loaded"], false);
        assert_eq!(body["docker"]["containers"], 2);
        assert_eq!(body["subscribers"], 0);
        assert!(body["broadcaster"].is_null());
        assert!(body["server_time"].is_string());
    }
}
