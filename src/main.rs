use anyhow::Context;
use clap::Parser;
use smartbot_link::domain::settings::SettingsService;
use smartbot_link::infrastructure::bluetooth::platform_adapter;
use smartbot_link::infrastructure::controller::ConnectionController;
use smartbot_link::infrastructure::logging::init_logger;
use smartbot_link::presentation::console::Console;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Drive an ESP32 robot over Bluetooth SPP or WiFi
#[derive(Debug, Parser)]
#[command(name = "smartbot-link", version, about)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Robot host for `wifi` without arguments
    #[arg(long)]
    host: Option<String>,

    /// Robot HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// trace, debug, info, warn or error
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Don't write log files
    #[arg(long)]
    no_file_log: bool,
}

fn load_settings(cli: &Cli) -> anyhow::Result<SettingsService> {
    let mut service = match &cli.settings {
        Some(path) => SettingsService::with_path(path.clone()),
        None => SettingsService::new().context("locating settings file")?,
    };

    let settings = service.get_mut();
    if let Some(host) = &cli.host {
        settings.wifi.host = host.clone();
    }
    if let Some(port) = cli.port {
        settings.wifi.port = port;
    }
    if let Some(level) = &cli.log_level {
        settings.log_settings.level = level.clone();
    }
    if cli.no_file_log {
        settings.log_settings.file_logging_enabled = false;
    }
    Ok(service)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let _log_guard = init_logger(&settings.get().log_settings)?;

    info!("Starting SmartBot Link (settings at {})", settings.path().display());

    let adapter = platform_adapter(&settings.get().bluetooth);
    let controller = ConnectionController::new(settings.get(), adapter)
        .context("creating connection controller")?;

    let console = Console::new(Arc::new(controller), Arc::new(Mutex::new(settings)));
    console.run().await?;

    info!("Goodbye");
    Ok(())
}
