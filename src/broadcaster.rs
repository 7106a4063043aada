// ============================================================================
// BROADCASTER
// ============================================================================
// The background collection loop:
//
//   Idle → Capturing → Publishing → Sleeping ─┐
//              ↑            │                 │
//              │            └──→ Backoff ──────┤   (capture or publish failed)
//              └──────────────────────────────┘
//
// Any await point observes the cancellation token and moves to `Stopped`.
// The first cycle runs immediately. Failures never end the loop: it waits
// the fixed backoff and starts over.
// ============================================================================

use std::fmt::{self, Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BroadcasterConfig;
use crate::error::{CaptureError, DevenvResult};
use crate::event::{Event, Publisher};
use crate::history::HistoryBuffer;
use crate::provider::SnapshotProvider;

// ----------------------------------------------------------------------------
// State & Statistics
// ----------------------------------------------------------------------------

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcasterState {
    Idle,
    Capturing,
    Publishing,
    Sleeping,
    Backoff,
    Stopped,
}

impl Display for BroadcasterState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BroadcasterState::Idle => write!(f, "idle"),
            BroadcasterState::Capturing => write!(f, "capturing"),
            BroadcasterState::Publishing => write!(f, "publishing"),
            BroadcasterState::Sleeping => write!(f, "sleeping"),
            BroadcasterState::Backoff => write!(f, "backoff"),
            BroadcasterState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    failures: AtomicU64,
    published: AtomicU64,
}

/// Point-in-time loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcasterStats {
    /// Cycles finished, successful or not
    pub cycles: u64,
    /// Cycles that ended in backoff
    pub failures: u64,
    /// Snapshots handed to the publisher
    pub published: u64,
}

/// Read-only view of a running (or finished) broadcaster. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BroadcasterMonitor {
    state: watch::Receiver<BroadcasterState>,
    counters: Arc<Counters>,
}

impl BroadcasterMonitor {
    pub fn state(&self) -> BroadcasterState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            cycles: self.counters.cycles.load(AtomicOrdering::Relaxed),
            failures: self.counters.failures.load(AtomicOrdering::Relaxed),
            published: self.counters.published.load(AtomicOrdering::Relaxed),
        }
    }

    /// Wait until the loop reaches `target`. Returns false if the broadcaster
    /// was dropped first.
    pub async fn wait_for_state(&mut self, target: BroadcasterState) -> bool {
        self.state.wait_for(|state| *state == target).await.is_ok()
    }
}

// ----------------------------------------------------------------------------
// Broadcaster
// ----------------------------------------------------------------------------

/// Periodically captures a snapshot, records it and publishes it.
pub struct Broadcaster {
    provider: Arc<dyn SnapshotProvider>,
    history: Arc<HistoryBuffer>,
    publisher: Arc<dyn Publisher>,
    config: BroadcasterConfig,
    state: watch::Sender<BroadcasterState>,
    counters: Arc<Counters>,
}

impl Broadcaster {
    pub fn new(
        provider: Arc<dyn SnapshotProvider>,
        history: Arc<HistoryBuffer>,
        publisher: Arc<dyn Publisher>,
        config: BroadcasterConfig,
    ) -> Self {
        let (state, _) = watch::channel(BroadcasterState::Idle);
        Self {
            provider,
            history,
            publisher,
            config,
            state,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn monitor(&self) -> BroadcasterMonitor {
        BroadcasterMonitor {
            state: self.state.subscribe(),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self, token: CancellationToken) -> BroadcasterHandle {
        let monitor = self.monitor();
        let task = tokio::spawn(self.run(token.clone()));
        BroadcasterHandle { token, task, monitor }
    }

    /// Run until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!(
            target: "devenv::broadcaster",
            provider = self.provider.name(),
            interval = ?self.config.interval,
            backoff = ?self.config.backoff,
            "Broadcaster started"
        );

        loop {
            let pause = match self.cycle(&token).await {
                None => break,
                Some(Ok(())) => {
                    self.counters.cycles.fetch_add(1, AtomicOrdering::Relaxed);
                    self.set_state(BroadcasterState::Sleeping);
                    self.config.interval
                }
                Some(Err(e)) => {
                    self.counters.cycles.fetch_add(1, AtomicOrdering::Relaxed);
                    self.counters.failures.fetch_add(1, AtomicOrdering::Relaxed);
                    warn!(
                        target: "devenv::broadcaster",
                        error = %e,
                        category = e.category(),
                        backoff = ?self.config.backoff,
                        "Cycle failed, backing off"
                    );
                    self.set_state(BroadcasterState::Backoff);
                    self.config.backoff
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.set_state(BroadcasterState::Stopped);
        let stats = self.monitor().stats();
        info!(
            target: "devenv::broadcaster",
            cycles = stats.cycles,
            failures = stats.failures,
            published = stats.published,
            "Broadcaster stopped"
        );
    }

    /// One capture → append → publish pass. `None` when cancelled mid-cycle.
    async fn cycle(&self, token: &CancellationToken) -> Option<DevenvResult<()>> {
        self.set_state(BroadcasterState::Capturing);

        let timeout = self.config.capture_timeout;
        let captured = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            result = tokio::time::timeout(timeout, self.provider.capture()) => result,
        };

        let snapshot = match captured {
            Ok(Ok(snapshot)) => Arc::new(snapshot),
            Ok(Err(e)) => return Some(Err(e.into())),
            Err(_) => return Some(Err(CaptureError::timeout(timeout).into())),
        };

        self.history.append(Arc::clone(&snapshot));

        self.set_state(BroadcasterState::Publishing);
        let delivered = match self.publisher.publish(&Event::MetricsUpdate(snapshot)) {
            Ok(delivered) => delivered,
            Err(e) => return Some(Err(e.into())),
        };
        self.counters.published.fetch_add(1, AtomicOrdering::Relaxed);

        debug!(
            target: "devenv::broadcaster",
            delivered,
            history = self.history.len(),
            "Snapshot published"
        );
        Some(Ok(()))
    }

    fn set_state(&self, state: BroadcasterState) {
        self.state.send_replace(state);
    }
}

impl Debug for Broadcaster {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Owner of a spawned broadcaster task
#[derive(Debug)]
pub struct BroadcasterHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
    monitor: BroadcasterMonitor,
}

impl BroadcasterHandle {
    pub fn monitor(&self) -> BroadcasterMonitor {
        self.monitor.clone()
    }

    /// Request the loop to stop at its next await point.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop and wait up to `grace` for the task to finish. The task is
    /// aborted when the grace period runs out; returns whether it exited on
    /// its own.
    pub async fn join(self, grace: Duration) -> bool {
        self.stop();
        let abort = self.task.abort_handle();
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(target: "devenv::broadcaster", error = %e, "Broadcaster task failed");
                false
            }
            Err(_) => {
                warn!(target: "devenv::broadcaster", ?grace, "Broadcaster did not stop in time, aborting");
                abort.abort();
                false
            }
        }
    }
}
