// ============================================================================
// HOST METRICS PROVIDER
// ============================================================================
// Reads Linux counters directly:
// - CPU from two reads of /proc/stat, `cpu_window` apart
// - Memory from /proc/meminfo
// - Disk space from statvfs() on the configured path
// Each group fails on its own; failures end up in `Snapshot::error`.
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::SamplerConfig;
use crate::error::{CaptureError, CaptureResult, SampleError, SampleResult};
use crate::snapshot::{DiskUsage, MemoryUsage, Snapshot, Timestamp};

use super::SnapshotProvider;

// ----------------------------------------------------------------------------
// CPU Times - For Delta Computation
// ----------------------------------------------------------------------------

/// Aggregate CPU counters from the `cpu` line of /proc/stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CpuTimes {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl CpuTimes {
    fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq + self.steal
    }

    /// Non-idle ticks
    fn active(&self) -> u64 {
        self.total() - self.idle - self.iowait
    }

    /// Parse a cpu line.
    /// Format: "cpu  12345 678 9012 34567 890 12 34 56"
    /// Fields after `idle` are optional on old kernels.
    fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        if parts.next()? != "cpu" {
            return None;
        }

        let user = parts.next()?.parse().ok()?;
        let nice = parts.next()?.parse().ok()?;
        let system = parts.next()?.parse().ok()?;
        let idle = parts.next()?.parse().ok()?;
        let mut optional = || parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let iowait = optional();
        let irq = optional();
        let softirq = optional();
        let steal = optional();

        Some(Self { user, nice, system, idle, iowait, irq, softirq, steal })
    }

    /// Find and parse the aggregate line of a /proc/stat dump.
    pub(crate) fn parse(content: &str) -> Option<Self> {
        content.lines().find_map(Self::parse_line)
    }

    /// Busy percentage over the interval since `prev`; 0 when no ticks elapsed.
    pub(crate) fn usage_since(&self, prev: &CpuTimes) -> f64 {
        let total_delta = self.total().saturating_sub(prev.total());
        if total_delta == 0 {
            return 0.0;
        }
        let active_delta = self.active().saturating_sub(prev.active());
        (active_delta as f64 / total_delta as f64 * 100.0).clamp(0.0, 100.0)
    }
}

// ----------------------------------------------------------------------------
// Memory
// ----------------------------------------------------------------------------

/// Parse /proc/meminfo into `MemoryUsage`.
///
/// Used memory is `MemTotal - MemAvailable`. Kernels without `MemAvailable`
/// fall back to `MemFree + Buffers + Cached`.
pub(crate) fn parse_meminfo(content: &str) -> Option<MemoryUsage> {
    let mut total = None;
    let mut available = None;
    let mut free = 0u64;
    let mut buffers = 0u64;
    let mut cached = 0u64;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(kib) = value.parse::<u64>() else {
            continue;
        };
        let bytes = kib * 1024;

        match key {
            "MemTotal:" => total = Some(bytes),
            "MemAvailable:" => available = Some(bytes),
            "MemFree:" => free = bytes,
            "Buffers:" => buffers = bytes,
            "Cached:" => cached = bytes,
            _ => {}
        }
    }

    let total = total?;
    let available = available.unwrap_or(free + buffers + cached);
    Some(MemoryUsage::new(total, total.saturating_sub(available)))
}

// ----------------------------------------------------------------------------
// Host Provider
// ----------------------------------------------------------------------------

/// Snapshot provider backed by procfs and statvfs.
#[derive(Debug, Clone)]
pub struct HostProvider {
    proc_root: PathBuf,
    disk_path: PathBuf,
    cpu_window: Duration,
}

impl HostProvider {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            proc_root: config.proc_root.clone(),
            disk_path: config.disk_path.clone(),
            cpu_window: config.cpu_window,
        }
    }

    async fn read_proc(&self, name: &str) -> SampleResult<(PathBuf, String)> {
        let path = self.proc_root.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok((path, content)),
            Err(source) => Err(SampleError::Read { path, source }),
        }
    }

    async fn read_cpu_times(&self) -> SampleResult<CpuTimes> {
        let (path, content) = self.read_proc("stat").await?;
        CpuTimes::parse(&content).ok_or_else(|| SampleError::parse(path, "no aggregate cpu line"))
    }

    async fn sample_cpu(&self) -> SampleResult<f64> {
        let before = self.read_cpu_times().await?;
        tokio::time::sleep(self.cpu_window).await;
        let after = self.read_cpu_times().await?;
        Ok(after.usage_since(&before))
    }

    async fn sample_memory(&self) -> SampleResult<MemoryUsage> {
        let (path, content) = self.read_proc("meminfo").await?;
        parse_meminfo(&content).ok_or_else(|| SampleError::parse(path, "MemTotal not found"))
    }

    async fn sample_disk(&self) -> CaptureResult<SampleResult<DiskUsage>> {
        let path = self.disk_path.clone();
        tokio::task::spawn_blocking(move || statvfs_usage(&path))
            .await
            .map_err(|e| CaptureError::Task {
                message: format!("disk sampling task failed: {e}"),
            })
    }
}

fn statvfs_usage(path: &Path) -> SampleResult<DiskUsage> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|source| SampleError::Statvfs {
        path: path.to_path_buf(),
        source,
    })?;

    let fragment = stat.fragment_size() as u64;
    let blocks = stat.blocks() as u64;
    let free = stat.blocks_free() as u64;

    let total = blocks * fragment;
    let used = blocks.saturating_sub(free) * fragment;
    Ok(DiskUsage::new(total, used))
}

#[async_trait]
impl SnapshotProvider for HostProvider {
    fn name(&self) -> &str {
        "host"
    }

    async fn capture(&self) -> CaptureResult<Snapshot> {
        // Memory and disk are read while the CPU window elapses.
        let (cpu, memory, disk) = tokio::join!(self.sample_cpu(), self.sample_memory(), self.sample_disk());
        let disk = disk?;

        let mut snapshot = Snapshot::new(Timestamp::now());

        match cpu {
            Ok(percent) => snapshot = snapshot.with_cpu(percent),
            Err(e) => snapshot = snapshot.with_error(e.to_string()),
        }
        match memory {
            Ok(memory) => snapshot = snapshot.with_memory(memory),
            Err(e) => snapshot = snapshot.with_error(e.to_string()),
        }
        match disk {
            Ok(disk) => snapshot = snapshot.with_disk(disk),
            Err(e) => snapshot = snapshot.with_error(e.to_string()),
        }

        if let Some(error) = &snapshot.error {
            warn!(target: "devenv::sampler", %error, "Partial snapshot");
        } else {
            debug!(
                target: "devenv::sampler",
                cpu = ?snapshot.cpu_percent,
                memory = ?snapshot.memory.map(|m| m.percent),
                disk = ?snapshot.disk.map(|d| d.percent),
                "Snapshot captured"
            );
        }

        Ok(snapshot)
    }
}
