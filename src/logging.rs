// ============================================================================
// LOGGING & TRACING INFRASTRUCTURE
// ============================================================================
// Structured logging with:
// - `RUST_LOG` directives layered over the configured default level
// - pretty / compact / json console output
// - Optional non-blocking file output
//
// Targets used across the crate:
//   devenv::service, devenv::broadcaster, devenv::gateway, devenv::store,
//   devenv::probe, devenv::sampler
// ============================================================================

use std::path::Path;

use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{DevenvError, DevenvResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Map a configured level name to a filter; unknown names mean `info`.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    match config.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(true)
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed(),
        "compact" => fmt::layer()
            .compact()
            .with_ansi(config.colors)
            .with_target(true)
            .boxed(),
        _ => fmt::layer()
            .pretty()
            .with_ansi(config.colors)
            .with_target(true)
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_thread_ids(false)
            .with_thread_names(true)
            .boxed(),
    }
}

fn file_layer(path: &Path) -> (BoxedLayer, WorkerGuard) {
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "devenv-monitor.log".into());

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
    (layer, guard)
}

/// Initialize the global subscriber.
///
/// The returned guard flushes the file writer when dropped and must be held
/// for the life of the process.
pub fn init_logging(config: &LoggingConfig) -> DevenvResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter(&config.level).into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];
    let mut guard = None;

    if let Some(path) = &config.file {
        let (layer, file_guard) = file_layer(path);
        layers.push(layer);
        guard = Some(file_guard);
    }

    let subscriber = tracing_subscriber::registry().with(layers).with(env_filter);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| DevenvError::Internal(format!("Failed to set logger: {}", e)))?;

    info!(
        target: "devenv::service",
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "Logging initialized"
    );

    Ok(guard)
}
