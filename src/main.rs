//! port-forwarder binary
//!
//! Loads the config, starts the overlay and runs every transport until all
//! of them have stopped.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use port_forwarder::config::{load_config, write_template};
use port_forwarder::forwarding::ForwarderSupervisor;
use port_forwarder::{init_logging, overlay};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// File written by `--new`, relative to the working directory
const TEMPLATE_FILE: &str = "config.json";

#[derive(Parser)]
#[command(name = "port-forwarder")]
#[command(version)]
#[command(about = "Forward local TCP ports to remote addresses")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Write a template config.json in the current directory and exit
    #[arg(short = 'n', long = "new")]
    new: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    if cli.new {
        return match write_template(Path::new(TEMPLATE_FILE)).await {
            Ok(()) => {
                info!("Template written to {}", TEMPLATE_FILE);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to write template: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    info!("Starting port-forwarder v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let overlay = overlay::from_config(&config);
    if let Err(e) = overlay.start().await {
        error!("Failed to start {} overlay: {}", overlay.name(), e);
        return ExitCode::FAILURE;
    }
    info!(
        "{} overlay up as {}, {} transport(s)",
        overlay.name(),
        config.hostname,
        config.transports.len()
    );

    let report = ForwarderSupervisor::new(&config, overlay.clone())
        .run_all()
        .await;
    info!(
        "Transports stopped: {}/{}",
        report.completed(),
        report.total
    );

    if let Err(e) = overlay.close().await {
        warn!("Failed to close {} overlay: {}", overlay.name(), e);
    }
    ExitCode::SUCCESS
}
