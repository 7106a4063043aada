// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// One error enum per subsystem, all convertible into `DevenvError`.
// Background failures (sampling, capture, publish) are values that the
// broadcaster logs and retries; request-path failures reach the caller.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Top-level Error
// ----------------------------------------------------------------------------

/// The main error type for the service.
/// All subsystem errors can be converted to this type.
#[derive(Error, Debug)]
pub enum DevenvError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Config store error: {0}")]
    Store(#[from] StoreError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DevenvError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            DevenvError::Config(_) => false,
            DevenvError::Capture(_) => true,
            DevenvError::Publish(_) => true,
            DevenvError::Store(e) => e.is_recoverable(),
            DevenvError::Server(_) => false,
            DevenvError::Http(_) => true,
            DevenvError::Io(_) => true,
            DevenvError::Internal(_) => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            DevenvError::Config(_) => "config",
            DevenvError::Capture(_) => "capture",
            DevenvError::Publish(_) => "publish",
            DevenvError::Store(_) => "store",
            DevenvError::Server(_) => "server",
            DevenvError::Http(_) => "http",
            DevenvError::Io(_) => "io",
            DevenvError::Internal(_) => "internal",
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to settings loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Sampling Errors
// ----------------------------------------------------------------------------

/// Failure to read one group of host counters.
///
/// These never leave the provider as errors: they are rendered into the
/// `error` field of the snapshot being captured.
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("statvfs({path}) failed: {source}")]
    Statvfs {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
}

impl SampleError {
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SampleError::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Capture Errors
// ----------------------------------------------------------------------------

/// A capture that produced no snapshot at all
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("capture task failed: {message}")]
    Task { message: String },

    #[error("snapshot source unavailable: {message}")]
    Unavailable { message: String },
}

impl CaptureError {
    pub fn timeout(timeout: std::time::Duration) -> Self {
        CaptureError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

// ----------------------------------------------------------------------------
// Publish Errors
// ----------------------------------------------------------------------------

/// Failure to fan an event out to subscribers
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to encode event '{kind}': {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

// ----------------------------------------------------------------------------
// Config Store Errors
// ----------------------------------------------------------------------------

/// Errors from the env-file key-value store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: &'static str },

    #[error("expected a JSON object of key/value pairs")]
    NotAnObject,

    #[error("no configuration keys provided")]
    EmptyUpdate,
}

impl StoreError {
    /// Validation failures are the caller's fault; IO failures may succeed later
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidKey { .. }
                | StoreError::InvalidValue { .. }
                | StoreError::NotAnObject
                | StoreError::EmptyUpdate
        )
    }

    pub fn is_recoverable(&self) -> bool {
        !self.is_client_error()
    }
}

// ----------------------------------------------------------------------------
// Server Errors
// ----------------------------------------------------------------------------

/// Errors from the HTTP/WebSocket gateway
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server terminated: {0}")]
    Serve(#[source] std::io::Error),
}

// ----------------------------------------------------------------------------
// Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for service operations
pub type DevenvResult<T> = Result<T, DevenvError>;

/// Result type for snapshot capture
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Result type for counter sampling
pub type SampleResult<T> = Result<T, SampleError>;

/// Result type for config store operations
pub type StoreResult<T> = Result<T, StoreError>;
