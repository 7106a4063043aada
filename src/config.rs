// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// Service settings with:
// - TOML file parsing (missing file means defaults)
// - `DEVENV_` environment overrides, nested keys split on `__`
// - humantime durations ("10s", "500ms")
// - Validation before anything starts
//
// The dashboard's own key-value configuration (`config.env`) is a separate
// concern handled by `crate::store`.
// ============================================================================

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::*;

// ----------------------------------------------------------------------------
// Root Settings
// ----------------------------------------------------------------------------

/// Root settings for the service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub broadcaster: BroadcasterConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub sampler: SamplerConfig,

    #[serde(default)]
    pub probes: ProbeConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings from an existing file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        Self::load_or_default(path)
    }

    /// Load settings, falling back to defaults for anything the file (if
    /// present) and the environment leave unset
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX).split("__"));

        let settings: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse from a TOML string (no environment overrides)
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let broadcaster = &self.broadcaster;

        if broadcaster.interval < Duration::from_millis(MIN_BROADCAST_INTERVAL_MS) {
            return Err(ConfigError::invalid_value(
                "broadcaster.interval",
                format!("must be at least {}ms", MIN_BROADCAST_INTERVAL_MS),
            ));
        }

        if broadcaster.backoff < broadcaster.interval {
            return Err(ConfigError::invalid_value(
                "broadcaster.backoff",
                "must not be shorter than broadcaster.interval",
            ));
        }

        if broadcaster.capture_timeout <= self.sampler.cpu_window {
            return Err(ConfigError::invalid_value(
                "broadcaster.capture_timeout",
                "must be longer than sampler.cpu_window",
            ));
        }

        if self.history.capacity == 0 {
            return Err(ConfigError::invalid_value("history.capacity", "must be at least 1"));
        }

        if self.history.query_limit == 0 {
            return Err(ConfigError::invalid_value("history.query_limit", "must be at least 1"));
        }

        if self.server.event_capacity == 0 {
            return Err(ConfigError::invalid_value("server.event_capacity", "must be at least 1"));
        }

        if self.probes.docker_command.is_empty() {
            return Err(ConfigError::invalid_value("probes.docker_command", "must not be empty"));
        }

        if self.probes.ping_command.is_empty() {
            return Err(ConfigError::invalid_value("probes.ping_command", "must not be empty"));
        }

        self.server.address.parse::<SocketAddr>().map_err(|e| {
            ConfigError::invalid_value("server.address", e.to_string())
        })?;

        Ok(())
    }

    /// Render the default settings as TOML
    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Resolve the listen address.
    ///
    /// Precedence: explicit port override, then `API_PORT` from the env file,
    /// then `server.address`.
    pub fn listen_address(
        &self,
        port_override: Option<u16>,
        env_file_port: Option<u16>,
    ) -> Result<SocketAddr, ConfigError> {
        let mut addr: SocketAddr = self
            .server
            .address
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::invalid_value("server.address", e.to_string()))?;

        if let Some(port) = port_override.or(env_file_port) {
            addr.set_port(port);
        }
        Ok(addr)
    }
}

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

/// HTTP/WebSocket gateway settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_server_addr")]
    pub address: String,

    /// Allow any origin (the dashboard frontend runs on its own dev server)
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Frames buffered per subscriber before it starts skipping
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_addr(),
            cors: true,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_server_addr() -> String {
    format!("0.0.0.0:{}", DEFAULT_API_PORT)
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_true() -> bool {
    true
}

// ----------------------------------------------------------------------------
// Broadcaster
// ----------------------------------------------------------------------------

/// Collection loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    /// Pause after a successful cycle
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Pause after a failed cycle
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,

    /// A capture taking longer than this fails the cycle
    #[serde(default = "default_capture_timeout", with = "humantime_serde")]
    pub capture_timeout: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            backoff: default_backoff(),
            capture_timeout: default_capture_timeout(),
        }
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(DEFAULT_BROADCAST_INTERVAL_SECS)
}

fn default_backoff() -> Duration {
    Duration::from_secs(DEFAULT_BACKOFF_SECS)
}

fn default_capture_timeout() -> Duration {
    Duration::from_secs(DEFAULT_CAPTURE_TIMEOUT_SECS)
}

// ----------------------------------------------------------------------------
// History
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Snapshots kept in memory
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,

    /// Entries returned by `/api/metrics/history` without `?limit=`
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            query_limit: default_query_limit(),
        }
    }
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_query_limit() -> usize {
    DEFAULT_HISTORY_QUERY_LIMIT
}

// ----------------------------------------------------------------------------
// Sampler
// ----------------------------------------------------------------------------

/// Host counter sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// procfs mount point
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// Filesystem reported as `disk`
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,

    /// Time between the two CPU counter reads
    #[serde(default = "default_cpu_window", with = "humantime_serde")]
    pub cpu_window: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            proc_root: default_proc_root(),
            disk_path: default_disk_path(),
            cpu_window: default_cpu_window(),
        }
    }
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_disk_path() -> PathBuf {
    PathBuf::from("/")
}

fn default_cpu_window() -> Duration {
    Duration::from_millis(DEFAULT_CPU_WINDOW_MS)
}

// ----------------------------------------------------------------------------
// Probes
// ----------------------------------------------------------------------------

/// External status probes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Program and arguments listing running containers (header line first)
    #[serde(default = "default_docker_command")]
    pub docker_command: Vec<String>,

    #[serde(default = "default_docker_timeout", with = "humantime_serde")]
    pub docker_timeout: Duration,

    /// Program and arguments; the target host is appended
    #[serde(default = "default_ping_command")]
    pub ping_command: Vec<String>,

    #[serde(default = "default_ping_timeout", with = "humantime_serde")]
    pub ping_timeout: Duration,

    /// Target used when the env file has no `REMOTE_HOST`
    #[serde(default = "default_host")]
    pub default_host: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            docker_command: default_docker_command(),
            docker_timeout: default_docker_timeout(),
            ping_command: default_ping_command(),
            ping_timeout: default_ping_timeout(),
            default_host: default_host(),
        }
    }
}

fn default_docker_command() -> Vec<String> {
    vec!["docker".into(), "ps".into()]
}

fn default_docker_timeout() -> Duration {
    Duration::from_secs(DOCKER_PROBE_TIMEOUT_SECS)
}

fn default_ping_command() -> Vec<String> {
    vec!["ping".into(), "-c".into(), "1".into()]
}

fn default_ping_timeout() -> Duration {
    Duration::from_secs(PING_PROBE_TIMEOUT_SECS)
}

fn default_host() -> String {
    "localhost".into()
}

// ----------------------------------------------------------------------------
// Env-file Store
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `KEY=VALUE` file served by `/api/config`
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            env_file: default_env_file(),
        }
    }
}

fn default_env_file() -> PathBuf {
    PathBuf::from(DEFAULT_ENV_FILE)
}

// ----------------------------------------------------------------------------
// Logging
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level; `RUST_LOG` directives take precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Also write to this file
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_dashboard_behavior() {
        let settings = Settings::default();

        assert_eq!(settings.broadcaster.interval, Duration::from_secs(10));
        assert_eq!(settings.broadcaster.backoff, Duration::from_secs(30));
        assert_eq!(settings.history.capacity, 50);
        assert_eq!(settings.history.query_limit, 20);
        assert_eq!(settings.server.address, "0.0.0.0:5001");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings = Settings::from_toml(
            r#"
            [broadcaster]
            interval = "2s"
            backoff = "6s"

            [history]
            capacity = 3
            "#,
        )
        .unwrap();

        assert_eq!(settings.broadcaster.interval, Duration::from_secs(2));
        assert_eq!(settings.broadcaster.backoff, Duration::from_secs(6));
        assert_eq!(settings.broadcaster.capture_timeout, Duration::from_secs(15));
        assert_eq!(settings.history.capacity, 3);
        assert_eq!(settings.probes, ProbeConfig::default());
    }

    #[test]
    fn test_backoff_shorter_than_interval_is_rejected() {
        let err = Settings::from_toml(
            r#"
            [broadcaster]
            interval = "10s"
            backoff = "1s"
            "#,
        )
        .unwrap_err();

        match err {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "broadcaster.backoff"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let err = Settings::from_toml("[history]\ncapacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("history.capacity"));
    }

    #[test]
    fn test_generated_config_parses_back() {
        let generated = Settings::generate_default_config();
        let parsed = Settings::from_toml(&generated).unwrap();
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_missing_file_is_reported_by_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("devenv.toml");
        assert!(matches!(
            Settings::load(&missing),
            Err(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devenv.toml");
        std::fs::write(&path, "[server]\naddress = \"127.0.0.1:9000\"\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.server.address, "127.0.0.1:9000");
    }

    #[test]
    fn test_listen_address_precedence() {
        let settings = Settings::default();

        let addr = settings.listen_address(None, None).unwrap();
        assert_eq!(addr.port(), 5001);

        let addr = settings.listen_address(None, Some(6000)).unwrap();
        assert_eq!(addr.port(), 6000);

        let addr = settings.listen_address(Some(7000), Some(6000)).unwrap();
        assert_eq!(addr.port(), 7000);
    }
}
