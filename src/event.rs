// ============================================================================
// EVENT BUS
// ============================================================================
// Push channel between the broadcaster (and config writes) and every
// connected WebSocket subscriber. Events are encoded to JSON once per publish
// and the encoded frame is shared by all receivers.
// ============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::PublishError;
use crate::snapshot::Snapshot;

/// A JSON text frame shared by all subscribers
pub type Frame = Arc<str>;

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Messages pushed to subscribers as `{ "type": ..., "payload": ... }`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// Sent once, right after a subscriber connects
    Connected { message: String },
    /// A new snapshot from the broadcaster or an on-demand capture
    MetricsUpdate(Arc<Snapshot>),
    /// Keys merged into the env file by a config write
    ConfigUpdated(BTreeMap<String, String>),
    /// A request from this subscriber could not be served
    Error { message: String },
}

impl Event {
    pub fn connected() -> Self {
        Event::Connected {
            message: format!("Connected to {}", crate::SERVICE_FULL_NAME),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Connected { .. } => "connected",
            Event::MetricsUpdate(_) => "metrics_update",
            Event::ConfigUpdated(_) => "config_updated",
            Event::Error { .. } => "error",
        }
    }

    /// Encode to the JSON text frame sent over the socket
    pub fn encode(&self) -> Result<Frame, PublishError> {
        serde_json::to_string(self)
            .map(Frame::from)
            .map_err(|source| PublishError::Encode {
                kind: self.kind(),
                source,
            })
    }
}

// ----------------------------------------------------------------------------
// Publisher seam
// ----------------------------------------------------------------------------

/// Where the broadcaster sends each captured snapshot.
pub trait Publisher: Send + Sync {
    /// Deliver to all current subscribers, returning how many received it.
    /// Having no subscribers is not a failure.
    fn publish(&self, event: &Event) -> Result<usize, PublishError>;
}

// ----------------------------------------------------------------------------
// Bus statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BusStats {
    published: AtomicU64,
    delivered: AtomicU64,
    encode_failures: AtomicU64,
}

/// Point-in-time bus counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusStatsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub encode_failures: u64,
    pub subscribers: usize,
}

// ----------------------------------------------------------------------------
// Event bus
// ----------------------------------------------------------------------------

/// Fan-out channel of encoded events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Frame>,
    stats: Arc<BusStats>,
}

impl EventBus {
    /// Create a bus buffering at most `capacity` frames per lagging receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            stats: Arc::new(BusStats::default()),
        }
    }

    /// Subscribe to all frames published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        BusStatsSnapshot {
            published: self.stats.published.load(AtomicOrdering::Relaxed),
            delivered: self.stats.delivered.load(AtomicOrdering::Relaxed),
            encode_failures: self.stats.encode_failures.load(AtomicOrdering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Publisher for EventBus {
    fn publish(&self, event: &Event) -> Result<usize, PublishError> {
        let frame = event.encode().map_err(|e| {
            self.stats.encode_failures.fetch_add(1, AtomicOrdering::Relaxed);
            e
        })?;

        self.stats.published.fetch_add(1, AtomicOrdering::Relaxed);
        // `send` only fails when nobody is listening.
        let delivered = self.sender.send(frame).unwrap_or(0);
        self.stats
            .delivered
            .fetch_add(delivered as u64, AtomicOrdering::Relaxed);
        Ok(delivered)
    }
}
