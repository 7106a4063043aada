// ============================================================================
// STATUS PROBES
// ============================================================================
// External commands reporting on services the dev environment depends on:
// - Docker daemon: `docker ps` exit status and container count
// - Remote host reachability: one ping to `REMOTE_HOST`
// A probe never fails: spawn errors, timeouts and non-zero exits all read as
// a negative status.
// ============================================================================

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::config::ProbeConfig;

/// Docker daemon status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerStatus {
    pub running: bool,
    pub containers: usize,
}

/// Combined probe results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub docker: DockerStatus,
    pub ssh_connected: bool,
}

/// Output of a finished probe command
#[derive(Debug)]
struct ProbeOutput {
    success: bool,
    stdout: String,
}

/// Run `argv` with a deadline. `None` when it could not be spawned or timed
/// out; the child is killed in that case.
async fn run_command(argv: &[String], timeout: Duration) -> Option<ProbeOutput> {
    let (program, args) = argv.split_first()?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            debug!(target: "devenv::probe", %program, error = %e, "Probe command could not be spawned");
            return None;
        }
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Some(ProbeOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        }),
        Ok(Err(e)) => {
            debug!(target: "devenv::probe", %program, error = %e, "Probe command failed");
            None
        }
        Err(_) => {
            debug!(target: "devenv::probe", %program, ?timeout, "Probe command timed out");
            None
        }
    }
}

/// Runs the configured probe commands.
#[derive(Debug, Clone)]
pub struct Prober {
    config: ProbeConfig,
}

impl Prober {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Docker is running when the listing command exits 0; the first output
    /// line is a header.
    pub async fn docker(&self) -> DockerStatus {
        match run_command(&self.config.docker_command, self.config.docker_timeout).await {
            Some(output) if output.success => DockerStatus {
                running: true,
                containers: output.stdout.lines().count().saturating_sub(1),
            },
            _ => DockerStatus::default(),
        }
    }

    /// Whether `host` answers the ping command; a blank host falls back to
    /// `default_host`.
    pub async fn ssh_reachable(&self, host: Option<&str>) -> bool {
        let host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.config.default_host);

        let mut argv = self.config.ping_command.clone();
        argv.push(host.to_string());

        let reachable = matches!(
            run_command(&argv, self.config.ping_timeout).await,
            Some(output) if output.success
        );
        debug!(target: "devenv::probe", %host, reachable, "Remote host probed");
        reachable
    }

    /// Both probes, run concurrently
    pub async fn report(&self, host: Option<&str>) -> ProbeReport {
        let (docker, ssh_connected) = tokio::join!(self.docker(), self.ssh_reachable(host));
        ProbeReport { docker, ssh_connected }
    }
}
