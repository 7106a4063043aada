// ============================================================================
// CORE TYPE SYSTEM
// ============================================================================
// The values flowing from the snapshot provider through the history buffer to
// subscribers. A `Snapshot` is built once by the provider and then only ever
// shared behind an `Arc`.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Timestamp in nanoseconds since Unix epoch.
/// Serialized as an RFC 3339 string with microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Zero timestamp (Unix epoch)
    pub const EPOCH: Timestamp = Timestamp(0);

    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    /// Get the current wall-clock time
    #[inline]
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Duration between two timestamps, zero if `earlier` is later
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let nanos = self.0.saturating_sub(earlier.0);
        Duration::from_nanos(nanos.max(0) as u64)
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_nanos_opt().unwrap_or(0))
    }

    /// ISO 8601 rendering used on the wire
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime().to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl From<SystemTime> for Timestamp {
    fn from(st: SystemTime) -> Self {
        let duration = st.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self(duration.as_nanos() as i64)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Timestamp::from_datetime(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}

// ----------------------------------------------------------------------------
// Resource Usage
// ----------------------------------------------------------------------------

/// Percentage of `part` in `whole`, clamped to [0, 100]; 0 for an empty whole.
fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    ((part as f64 / whole as f64) * 100.0).clamp(0.0, 100.0)
}

/// Physical memory utilization in bytes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
    pub percent: f64,
}

impl MemoryUsage {
    pub fn new(total: u64, used: u64) -> Self {
        let used = used.min(total);
        Self {
            total,
            used,
            percent: percent_of(used, total),
        }
    }
}

/// Filesystem utilization in bytes; `percent` is always `used / total * 100`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub percent: f64,
}

impl DiskUsage {
    pub fn new(total: u64, used: u64) -> Self {
        let used = used.min(total);
        Self {
            total,
            used,
            percent: percent_of(used, total),
        }
    }
}

// ----------------------------------------------------------------------------
// Snapshot
// ----------------------------------------------------------------------------

/// One point-in-time capture of host resource utilization.
///
/// Counter groups that could not be read are `None` and the reason is
/// recorded in `error`. Such partial snapshots are still regular data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Snapshot {
    /// An empty snapshot taken at `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            cpu_percent: None,
            memory: None,
            disk: None,
            error: None,
        }
    }

    pub fn with_cpu(mut self, percent: f64) -> Self {
        self.cpu_percent = Some(percent.clamp(0.0, 100.0));
        self
    }

    pub fn with_memory(mut self, memory: MemoryUsage) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_disk(mut self, disk: DiskUsage) -> Self {
        self.disk = Some(disk);
        self
    }

    /// Append a failure message; several failures are joined with `"; "`
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.error = Some(match self.error.take() {
            Some(existing) => format!("{existing}; {message}"),
            None => message,
        });
        self
    }

    /// True when at least one counter group failed
    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}
