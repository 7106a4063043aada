// ============================================================================
// SERVICE LIFECYCLE
// ============================================================================
// Wires settings → provider → history → event bus → broadcaster → gateway.
//
// Startup: open env file, resolve listen address, bind, spawn broadcaster,
// serve. Shutdown (signal or token): stop accepting, close sockets, stop the
// broadcaster within the grace period.
// ============================================================================

use std::fmt::{self, Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broadcaster::Broadcaster;
use crate::config::Settings;
use crate::error::{DevenvError, DevenvResult};
use crate::event::EventBus;
use crate::gateway::{self, AppState};
use crate::history::HistoryBuffer;
use crate::probe::Prober;
use crate::provider::{HostProvider, SnapshotProvider};
use crate::store::ConfigStore;
use crate::*;

/// The assembled backend, ready to start
pub struct Service {
    settings: Settings,
    port_override: Option<u16>,
    provider: Arc<dyn SnapshotProvider>,
    grace_period: Duration,
}

impl Service {
    pub fn new(settings: Settings) -> Self {
        let provider = Arc::new(HostProvider::new(&settings.sampler));
        Self {
            settings,
            port_override: None,
            provider,
            grace_period: Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS),
        }
    }

    /// Listen port taking precedence over `API_PORT` and the settings file
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port_override = port;
        self
    }

    /// Replace the host provider
    pub fn with_provider(mut self, provider: Arc<dyn SnapshotProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Bind and start all components. Everything stops when `token` is
    /// cancelled.
    pub async fn start(self, token: CancellationToken) -> DevenvResult<ServiceHandle> {
        let settings = self.settings;

        let store = Arc::new(ConfigStore::open(&settings.store.env_file).await?);
        let addr = settings.listen_address(self.port_override, store.api_port())?;
        let listener = gateway::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let history = Arc::new(HistoryBuffer::new(settings.history.capacity));
        let bus = EventBus::new(settings.server.event_capacity);

        let broadcaster = Broadcaster::new(
            Arc::clone(&self.provider),
            Arc::clone(&history),
            Arc::new(bus.clone()),
            settings.broadcaster.clone(),
        )
        .spawn(token.child_token());

        let state = AppState::new(
            history,
            self.provider,
            bus,
            store,
            Arc::new(Prober::new(settings.probes.clone())),
        )
        .with_broadcaster(broadcaster.monitor())
        .with_query_limit(settings.history.query_limit)
        .with_capture_timeout(settings.broadcaster.capture_timeout)
        .with_shutdown(token.clone());

        let router = gateway::router(state, settings.server.cors);

        info!(
            target: "devenv::service",
            version = SERVICE_VERSION,
            address = %local_addr,
            "{} started",
            SERVICE_FULL_NAME
        );

        let grace = self.grace_period;
        let shutdown = token.clone();
        let server = tokio::spawn(async move {
            let served = gateway::serve(listener, router, async move { shutdown.cancelled().await }).await;
            if !broadcaster.join(grace).await {
                warn!(target: "devenv::service", "Broadcaster did not stop cleanly");
            }
            served.map_err(DevenvError::from)
        });

        Ok(ServiceHandle {
            local_addr,
            token,
            server,
        })
    }

    /// Run until SIGINT/SIGTERM.
    pub async fn run(self) -> DevenvResult<()> {
        let token = CancellationToken::new();
        let handle = self.start(token.clone()).await?;

        let signals = tokio::spawn(async move {
            wait_for_signal().await;
            token.cancel();
        });

        let result = handle.wait().await;
        signals.abort();
        info!(target: "devenv::service", "Shutdown complete");
        result
    }
}

impl Debug for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("settings", &self.settings)
            .field("port_override", &self.port_override)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// A started service
#[derive(Debug)]
pub struct ServiceHandle {
    local_addr: SocketAddr,
    token: CancellationToken,
    server: JoinHandle<DevenvResult<()>>,
}

impl ServiceHandle {
    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the service to stop on its own
    pub async fn wait(self) -> DevenvResult<()> {
        self.server
            .await
            .map_err(|e| DevenvError::Internal(format!("service task failed: {e}")))?
    }

    /// Stop everything and wait for it
    pub async fn shutdown(self) -> DevenvResult<()> {
        info!(target: "devenv::service", "Shutdown requested");
        self.token.cancel();
        self.wait().await
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use signal::unix::{signal as unix_signal, SignalKind};

        match (unix_signal(SignalKind::terminate()), unix_signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!(target: "devenv::service", "Received SIGTERM"),
                    _ = sigint.recv() => info!(target: "devenv::service", "Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(target: "devenv::service", error = %e, "Failed to install signal handlers, falling back to Ctrl-C");
            }
        }
    }

    if let Err(e) = signal::ctrl_c().await {
        error!(target: "devenv::service", error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!(target: "devenv::service", "Received Ctrl-C");
}
