// ============================================================================
// CLI & COMMAND LINE INTERFACE
// ============================================================================
// - `run` (default) starts the service
// - `validate` / `generate-config` work on the settings file
// - `snapshot` takes one capture locally
// - `status` / `health` query a running instance over HTTP
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::error::{DevenvError, DevenvResult};
use crate::provider::{HostProvider, SnapshotProvider};
use crate::*;

// ----------------------------------------------------------------------------
// Argument Parser
// ----------------------------------------------------------------------------

/// DevEnv Monitor CLI
#[derive(Parser, Debug)]
#[command(
    name = "devenv-monitor",
    author = "DevEnv Team",
    version,
    about = "Metrics, history and live updates for the remote development environment dashboard",
    long_about = "DevEnv Monitor samples host CPU, memory and disk usage, keeps a bounded \
                  history of snapshots and pushes them live to dashboard clients over \
                  WebSocket. It also serves Docker/SSH status and the config.env settings."
)]
pub struct Cli {
    /// Settings file path
    #[arg(short, long, default_value = DEFAULT_SETTINGS_PATH, env = "DEVENV_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "DEVENV_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug logging
    #[arg(short, long, env = "DEVENV_DEBUG")]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the service
    Run {
        /// Listen port (overrides API_PORT and the settings file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Validate the settings file
    Validate {
        /// Show the full parsed settings
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate a default settings file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Capture one snapshot and print it as JSON
    Snapshot,

    /// Show the status of a running instance
    Status {
        /// Base URL of the running instance
        #[arg(short, long, default_value_t = default_url())]
        url: String,
    },

    /// Run a health check against a running instance
    Health {
        /// Base URL of the running instance
        #[arg(short, long, default_value_t = default_url())]
        url: String,
    },

    /// Show version and build info
    Version,
}

fn default_url() -> String {
    format!("http://127.0.0.1:{}", DEFAULT_API_PORT)
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

/// Handle the validate subcommand
pub fn handle_validate(config_path: &Path, verbose: bool) -> DevenvResult<()> {
    println!("Validating settings file: {}", config_path.display());

    match Settings::load(config_path) {
        Ok(settings) => {
            println!("✅ Settings are valid!");

            if verbose {
                println!("\n📋 Parsed settings:");
                println!("{}", "=".repeat(60));
                match toml::to_string_pretty(&settings) {
                    Ok(s) => println!("{}", s),
                    Err(e) => println!("Failed to serialize: {}", e),
                }
            }

            println!("\n📊 Summary:");
            println!("  • Listen address: {}", settings.server.address);
            println!(
                "  • Broadcast interval: {} (backoff {})",
                humantime::format_duration(settings.broadcaster.interval),
                humantime::format_duration(settings.broadcaster.backoff)
            );
            println!("  • History capacity: {}", settings.history.capacity);
            println!("  • Env file: {}", settings.store.env_file.display());
            Ok(())
        }
        Err(e) => {
            println!("❌ Settings validation failed!");
            println!("Error: {}", e);
            Err(DevenvError::Config(e))
        }
    }
}

/// Handle the generate-config subcommand
pub fn handle_generate_config(output: Option<&Path>) -> DevenvResult<()> {
    let settings = Settings::generate_default_config();

    match output {
        Some(path) => {
            fs::write(path, &settings)?;
            println!("✅ Default settings written to: {}", path.display());
        }
        None => println!("{}", settings),
    }

    Ok(())
}

/// Handle the snapshot subcommand
pub async fn handle_snapshot(settings: &Settings) -> DevenvResult<()> {
    let provider = HostProvider::new(&settings.sampler);
    let snapshot = tokio::time::timeout(settings.broadcaster.capture_timeout, provider.capture())
        .await
        .map_err(|_| error::CaptureError::timeout(settings.broadcaster.capture_timeout))??;

    let json = serde_json::to_string_pretty(&snapshot).map_err(|e| DevenvError::Internal(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

/// GET `path` on a running instance and print the JSON body
pub async fn handle_remote(base_url: &str, path: &str) -> DevenvResult<()> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;

    let response = client.get(&url).send().await?.error_for_status()?;
    let body: serde_json::Value = response.json().await?;

    let pretty = serde_json::to_string_pretty(&body).map_err(|e| DevenvError::Internal(e.to_string()))?;
    println!("{}", pretty);
    Ok(())
}

/// Handle the version subcommand
pub fn handle_version() {
    println!("🛰️  {} v{}", SERVICE_FULL_NAME, SERVICE_VERSION);
    println!();
    println!("Build Information:");
    println!("  • Target: {}", std::env::consts::ARCH);
    println!("  • OS: {}", std::env::consts::OS);
    println!("  • Family: {}", std::env::consts::FAMILY);
    println!();
    println!("Endpoints:");
    println!("  • HTTP pull: /api/metrics, /api/metrics/history, /api/config, /api/status");
    println!("  • WebSocket push: /ws");
}
