use anyhow::{Context, Result as AnyhowResult};
use clap::Parser;
use tracing::{info, warn};

use devenv_monitor::cli::{self, Cli, Commands};
use devenv_monitor::logging::init_logging;
use devenv_monitor::service::Service;
use devenv_monitor::{Settings, SERVICE_FULL_NAME, SERVICE_VERSION};

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Subcommands that need neither settings nor logging
    match &cli.command {
        Some(Commands::Version) => {
            cli::handle_version();
            return Ok(());
        }
        Some(Commands::GenerateConfig { output }) => {
            cli::handle_generate_config(output.as_deref())?;
            return Ok(());
        }
        Some(Commands::Validate { verbose }) => {
            cli::handle_validate(&cli.config, *verbose)?;
            return Ok(());
        }
        Some(Commands::Status { url }) => {
            cli::handle_remote(url, "/api/status").await?;
            return Ok(());
        }
        Some(Commands::Health { url }) => {
            cli::handle_remote(url, "/api/health").await?;
            return Ok(());
        }
        _ => {}
    }

    let settings = Settings::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

    let mut logging_config = settings.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }

    let _log_guard = init_logging(&logging_config)?;

    if !cli.config.exists() {
        warn!(
            target: "devenv::service",
            path = %cli.config.display(),
            "Settings file not found, using defaults"
        );
    }

    match cli.command {
        Some(Commands::Snapshot) => {
            cli::handle_snapshot(&settings).await?;
        }
        Some(Commands::Run { port }) => {
            info!("🛰️  {} v{}", SERVICE_FULL_NAME, SERVICE_VERSION);
            Service::new(settings).with_port(port).run().await?;
        }
        None => {
            info!("🛰️  {} v{}", SERVICE_FULL_NAME, SERVICE_VERSION);
            Service::new(settings).run().await?;
        }
        Some(Commands::Version)
        | Some(Commands::GenerateConfig { .. })
        | Some(Commands::Validate { .. })
        | Some(Commands::Status { .. })
        | Some(Commands::Health { .. }) => {}
    }

    Ok(())
}
