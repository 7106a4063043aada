//! End-to-end: a started service pushing over a real WebSocket connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use devenv_monitor::error::CaptureResult;
use devenv_monitor::service::{Service, ServiceHandle};
use devenv_monitor::{MemoryUsage, Settings, Snapshot, SnapshotProvider, Timestamp};

#[derive(Debug, Default)]
struct CountingProvider {
    calls: AtomicU64,
}

#[async_trait]
impl SnapshotProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    async fn capture(&self) -> CaptureResult<Snapshot> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Snapshot::new(Timestamp::now())
            .with_cpu(call as f64)
            .with_memory(MemoryUsage::new(4096, 1024)))
    }
}

/// Never finishes a capture.
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

fn test_settings(dir: &tempfile::TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.server.address = "127.0.0.1:0".into();
    settings.store.env_file = dir.path().join("config.env");
    settings.broadcaster.interval = Duration::from_millis(200);
    settings.broadcaster.backoff = Duration::from_millis(200);
    settings.probes.docker_command = vec!["true".into()];
    settings.probes.ping_command = vec!["true".into()];
    settings
}

async fn start_service(dir: &tempfile::TempDir) -> ServiceHandle {
    Service::new(test_settings(dir))
        .with_provider(Arc::new(CountingProvider::default()))
        .start(CancellationToken::new())
        .await
        .unwrap()
}

async fn start_stalled_service(dir: &tempfile::TempDir, capture_timeout: Duration) -> ServiceHandle {
    let mut settings = test_settings(dir);
    settings.broadcaster.interval = Duration::from_secs(60);
    settings.broadcaster.backoff = Duration::from_secs(60);
    settings.broadcaster.capture_timeout = capture_timeout;

    Service::new(settings)
        .with_provider(Arc::new(StalledProvider))
        .start(CancellationToken::new())
        .await
        .unwrap()
}

async fn wait_for_close(socket: &mut Socket) -> bool {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = socket.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    })
    .await
    .is_ok()
}

type Socket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame within 5s")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn next_of_type(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let frame = next_json(socket).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

#[tokio::test]
async fn test_subscriber_receives_greeting_and_periodic_updates() {
    let dir = tempfile::tempdir().unwrap();
    let service = start_service(&dir).await;
    let url = format!("ws://{}/ws", service.local_addr());

    let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    let greeting = next_json(&mut socket).await;
    assert_eq!(greeting["type"], "connected");

    let first = next_of_type(&mut socket, "metrics_update").await;
    let second = next_of_type(&mut socket, "metrics_update").await;
    let first_cpu = first["payload"]["cpu_percent"].as_f64().unwrap();
    let second_cpu = second["payload"]["cpu_percent"].as_f64().unwrap();
    assert!(second_cpu > first_cpu);
    assert_eq!(first["payload"]["memory"]["percent"], 25.0);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_request_metrics_and_config_updates() {
    let dir = tempfile::tempdir().unwrap();
    let service = start_service(&dir).await;
    let base = format!("http://{}", service.local_addr());

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", service.local_addr()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "connected");

    socket
        .send(Message::Text(json!({ "type": "request_metrics" }).to_string()))
        .await
        .unwrap();
    let update = next_of_type(&mut socket, "metrics_update").await;
    assert!(update["payload"]["timestamp"].is_string());

    let client = reqwest::Client::new();
    let response: Value = client
        .post(format!("{base}/api/config"))
        .json(&json!({ "REMOTE_HOST": "10.1.2.3" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["success"], true);

    let announced = next_of_type(&mut socket, "config_updated").await;
    assert_eq!(announced["payload"], json!({ "REMOTE_HOST": "10.1.2.3" }));

    let history: Value = client
        .get(format!("{base}/api/metrics/history"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!history.as_array().unwrap().is_empty());

    let metrics: Value = client.get(format!("{base}/api/metrics")).send().await.unwrap().json().await.unwrap();
    assert_eq!(metrics["ssh_connected"], true);
    assert_eq!(metrics["docker"], json!({ "running": true, "containers": 0 }));

    let status: Value = client.get(format!("{base}/api/status")).send().await.unwrap().json().await.unwrap();
    assert_eq!(status["subscribers"], 1);
    assert!(status["broadcaster"]["cycles"].as_u64().unwrap() >= 1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_open_sockets() {
    let dir = tempfile::tempdir().unwrap();
    let service = start_service(&dir).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", service.local_addr()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "connected");

    tokio::time::timeout(Duration::from_secs(10), service.shutdown())
        .await
        .expect("shutdown hung")
        .unwrap();

    assert!(wait_for_close(&mut socket).await);
}

#[tokio::test]
async fn test_stalled_request_metrics_reports_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let service = start_stalled_service(&dir, Duration::from_millis(500)).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", service.local_addr()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "connected");

    socket
        .send(Message::Text(json!({ "type": "request_metrics" }).to_string()))
        .await
        .unwrap();
    let reply = next_of_type(&mut socket, "error").await;
    assert!(reply["payload"]["message"].as_str().unwrap().contains("timed out"));

    service.shutdown().await.unwrap();
    assert!(wait_for_close(&mut socket).await);
}

#[tokio::test]
async fn test_shutdown_closes_socket_waiting_on_capture() {
    let dir = tempfile::tempdir().unwrap();
    let service = start_stalled_service(&dir, Duration::from_secs(120)).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", service.local_addr()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut socket).await["type"], "connected");

    socket
        .send(Message::Text(json!({ "type": "request_metrics" }).to_string()))
        .await
        .unwrap();
    // Let the server pick the request up before stopping.
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(10), service.shutdown())
        .await
        .expect("shutdown hung")
        .unwrap();
    assert!(wait_for_close(&mut socket).await);
}
