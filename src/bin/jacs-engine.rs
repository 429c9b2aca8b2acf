//! # JACS Service Engine
//!
//! Standalone engine process: loads configuration, picks the configured store,
//! registers the built-in processors and dispatches services until Ctrl-C.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use jacs_services::logging::init_structured_logging;
use jacs_services::orchestration::{BootstrapConfig, JacsServiceSystem};

#[derive(Parser)]
#[command(name = "jacs-engine")]
#[command(about = "Run the JACS service engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: nearest config/ with jacs-services.yaml)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Environment (default: JACS_ENV, then APP_ENV, then development)
    #[arg(short, long)]
    environment: Option<String>,

    /// Override the number of processing slots
    #[arg(long)]
    slots: Option<usize>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_structured_logging();

    let bootstrap = BootstrapConfig {
        config_directory: cli.config_dir,
        environment_override: cli.environment,
    };
    let config_manager = bootstrap
        .load_config_manager()
        .context("failed to load configuration")?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config_manager.debug_config())?);
        return Ok(());
    }

    let mut system = JacsServiceSystem::bootstrap(config_manager)
        .await
        .context("failed to bootstrap the service engine")?;
    if let Some(slots) = cli.slots {
        system.engine().set_processing_slots_count(slots);
    }
    system
        .register_builtin_processors()
        .context("failed to register built-in processors")?;
    system.start();
    info!(status = ?system.status(), "🚀 JACS engine running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("🛑 Ctrl-C received");
    system.stop().await.context("failed to stop the service engine")?;
    Ok(())
}
