// ============================================================================
// SNAPSHOT PROVIDER
// ============================================================================
// Source of snapshots for the broadcaster and for on-demand captures.
//
// A provider reports partial failures inside the snapshot (`Snapshot::error`)
// and only returns `Err` when it could not produce a snapshot at all.
// ============================================================================

mod host;

use async_trait::async_trait;

use crate::error::CaptureResult;
use crate::snapshot::Snapshot;

pub use host::HostProvider;

/// Produces point-in-time resource snapshots.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Take one snapshot. Reads host counters and nothing else.
    async fn capture(&self) -> CaptureResult<Snapshot>;
}
