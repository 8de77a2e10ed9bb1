// src/main.rs - tft-bridge entry point
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use klipper_tft_bridge::bridge::Bridge;
use klipper_tft_bridge::communication::LinuxSerial;
use klipper_tft_bridge::moonraker::MoonrakerClient;
use tft_shared::{Config, ConfigError, SerialInterface, load_config};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "tft-bridge.toml";

/// Bridge a Marlin TFT panel to Klipper through Moonraker.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: tft-bridge.toml, built-in defaults if absent)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Same as the positional argument
    #[arg(long = "config", value_name = "PATH", id = "config_flag")]
    config_flag: Option<PathBuf>,
    /// Log every line exchanged with the panel
    #[arg(short, long)]
    verbose: bool,
    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// An explicitly named file must exist; the default one may be missing.
fn resolve_config(explicit: Option<&Path>) -> Result<(Config, String), ConfigError> {
    match explicit {
        Some(path) => Ok((load_config(path)?, path.display().to_string())),
        None if Path::new(DEFAULT_CONFIG).exists() => Ok((load_config(DEFAULT_CONFIG)?, DEFAULT_CONFIG.to_string())),
        None => {
            let config = Config::default();
            config.validate()?;
            Ok((config, "built-in defaults".to_string()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let explicit = cli.config_flag.as_deref().or(cli.config.as_deref());

    let (config, source) = match resolve_config(explicit) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_logging("info");
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(if cli.verbose { "debug" } else { &config.logging.level });

    tracing::info!("Starting tft-bridge {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Configuration: {}", source);
    tracing::info!("Moonraker: {}", config.moonraker.base_url());
    tracing::info!("Panel: {} @ {} baud", config.serial.port, config.serial.baud);
    if cli.check_config {
        tracing::info!("Configuration OK");
        return ExitCode::SUCCESS;
    }

    let serial = Arc::new(LinuxSerial);
    let ports = serial.available_ports();
    if !ports.is_empty() && !ports.contains(&config.serial.port) {
        tracing::warn!("{} not among detected ports {:?}", config.serial.port, ports);
    }

    let client = MoonrakerClient::new(&config.moonraker);
    match client.server_info().await {
        Ok(info) => {
            tracing::info!(
                "Moonraker {} reachable, klippy {}",
                info.moonraker_version.as_deref().unwrap_or("(unknown version)"),
                info.klippy_state
            );
            if !info.klippy_connected {
                tracing::warn!("Klippy is not connected to Moonraker; the panel will see stale values");
            }
        }
        Err(e) => tracing::warn!("Moonraker not reachable yet at {}: {}", client.base_url(), e),
    }

    let bridge = Bridge::new(config, Arc::new(client), serial);
    match bridge.run(shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Bridge failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
