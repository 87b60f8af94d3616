//! usb-printer-scan CLI
//!
//! Scans attached USB printers, walks the permission round-trip for each
//! privileged target, and prints the resulting device list as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use common::{UsbBridge, UsbCommand, create_usb_bridge, setup_logging};
use scanner::config::ScannerConfig;
use scanner::scan::{ScanTimeouts, spawn_coordinator};
use scanner::usb::spawn_usb_worker;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "printer-scan")]
#[command(
    author,
    version,
    about = "Scan attached USB printers and read their serial numbers"
)]
#[command(long_about = "
Enumerates attached USB printers and, for privileged targets (by default
devices whose manufacturer string contains CITIZEN), walks the permission
round-trip required to read the hardware serial number. Devices whose serial
number cannot be obtained are still listed, with an empty serialNumber.

EXAMPLES:
    # Full scan including serial numbers
    printer-scan

    # Plain listing, no permission round-trips
    printer-scan --list

    # Custom timeouts
    printer-scan --device-timeout 5 --global-timeout 30

CONFIGURATION:
    The scanner looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-printer-scan/scanner.toml
    3. /etc/usb-printer-scan/scanner.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// List devices without the serial number round-trips
    #[arg(long)]
    list: bool,

    /// Per-device permission timeout in seconds
    #[arg(long, value_name = "SECS")]
    device_timeout: Option<u64>,

    /// Global scan timeout in seconds
    #[arg(long, value_name = "SECS")]
    global_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ScannerConfig::default();
        let path = ScannerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ScannerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ScannerConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-printer-scan v{}", env!("CARGO_PKG_VERSION"));

    let mut timeouts: ScanTimeouts = config.scan.timeouts();
    if let Some(secs) = args.device_timeout {
        timeouts.per_device = Duration::from_secs(secs);
    }
    if let Some(secs) = args.global_timeout {
        timeouts.global = Duration::from_secs(secs);
    }

    let (bridge, worker) = create_usb_bridge();
    let usb_handle = spawn_usb_worker(
        worker,
        config.usb.filters.clone(),
        config.usb.privileged_manufacturers.clone(),
    );

    let scan = spawn_coordinator(bridge.clone(), timeouts);

    // Ctrl-C cancels the in-flight scan; the scan itself still resolves with
    // whatever was collected so far.
    let cancel_handle = scan.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            let status = cancel_handle.cancel_scan().await;
            info!("{}", status);
        }
    });

    let result = scan.start_scan(!args.list).await;

    info!("Shutting down USB subsystem...");
    if let Err(e) = shutdown_usb_worker(bridge).await {
        error!("Error shutting down USB worker: {:#}", e);
    }
    match usb_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB worker exited with error: {}", e),
        Err(e) => error!("USB worker thread panicked: {:?}", e),
    }

    let devices = result.context("Scan failed")?;
    if devices.is_empty() {
        println!("[]");
    } else {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    }

    Ok(())
}

/// Shutdown the USB worker thread gracefully
async fn shutdown_usb_worker(bridge: UsbBridge) -> Result<()> {
    bridge
        .send_command(UsbCommand::Shutdown)
        .await
        .context("Failed to send Shutdown command")?;
    Ok(())
}
