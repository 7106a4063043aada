//! WebSocket push channel.
//!
//! Each connection gets a `connected` frame, then every frame published on
//! the event bus. A client may send `{"type": "request_metrics"}` to get a
//! fresh snapshot sent to it alone.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::event::{Event, Frame};

/// Messages a client may send
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    RequestMetrics,
}

pub(super) async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_frame(sink: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> bool {
    sink.send(Message::Text(frame.to_string())).await.is_ok()
}

async fn send_event(sink: &mut SplitSink<WebSocket, Message>, event: &Event) -> bool {
    match event.encode() {
        Ok(frame) => send_frame(sink, &frame).await,
        Err(e) => {
            warn!(target: "devenv::gateway", error = %e, "Failed to encode event");
            true
        }
    }
}

/// Capture a snapshot for one client
async fn on_demand_metrics(state: &AppState) -> Event {
    match state.capture().await {
        Ok(snapshot) => Event::MetricsUpdate(Arc::new(snapshot)),
        Err(e) => Event::Error {
            message: e.to_string(),
        },
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = Uuid::new_v4();
    // Subscribe before the greeting so nothing published in between is lost.
    let mut events = state.bus.subscribe();
    let (mut sink, mut stream) = socket.split();

    info!(
        target: "devenv::gateway",
        connection = %id,
        subscribers = state.bus.subscriber_count(),
        "Subscriber connected"
    );

    if !send_event(&mut sink, &Event::connected()).await {
        return;
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            received = events.recv() => match received {
                Ok(frame) => {
                    if !send_frame(&mut sink, &frame).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "devenv::gateway", connection = %id, skipped, "Subscriber lagging, frames skipped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::RequestMetrics) => {
                        let event = tokio::select! {
                            _ = state.shutdown.cancelled() => {
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                            event = on_demand_metrics(&state) => event,
                        };
                        if !send_event(&mut sink, &event).await {
                            break;
                        }
                    }
                    Err(_) => {
                        debug!(target: "devenv::gateway", connection = %id, message = %text, "Ignoring client message");
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(target: "devenv::gateway", connection = %id, error = %e, "Socket error");
                    break;
                }
            },
        }
    }

    drop(events);
    info!(
        target: "devenv::gateway",
        connection = %id,
        subscribers = state.bus.subscriber_count(),
        "Subscriber disconnected"
    );
}
