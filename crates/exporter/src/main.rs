//! temper-exporter
//!
//! Serves the temperatures of all attached TEMPer USB sticks as Prometheus
//! metrics.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use driver::DeviceContext;
use exporter::{
    ExporterConfig, HttpServer, PollEvent, PollerBridge, Readings, create_poller_bridge,
    setup_logging, spawn_poller,
};
use std::path::PathBuf;
use std::thread::JoinHandle;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "temper-exporter")]
#[command(
    author,
    version,
    about = "Prometheus exporter for TEMPer USB thermometers"
)]
#[command(long_about = "
Reads every attached TEMPer USB stick once per polling interval and serves
the latest temperatures in the Prometheus text format.

EXAMPLES:
    # Serve on port 9120
    temper-exporter 9120

    # List detected sticks and exit
    temper-exporter --list-sticks

    # Run with a custom config and debug logging
    temper-exporter --config /etc/temper-exporter/exporter.toml --log-level debug

CONFIGURATION:
    The exporter looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/temper-exporter/exporter.toml
    3. /etc/temper-exporter/exporter.toml
    4. Built-in defaults

Access to the sticks usually requires root or a udev rule granting write
access to the USB device nodes.
")]
struct Args {
    /// Port to serve metrics on (overrides the configured listen port)
    #[arg(value_name = "PORT")]
    port: Option<u16>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:9120
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// List detected sticks and exit
    #[arg(long)]
    list_sticks: bool,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ExporterConfig::default();
        let path = ExporterConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = match args.config {
        Some(ref path) => ExporterConfig::load(Some(exporter::config::expand_path(path)))
            .context("Failed to load configuration")?,
        None => ExporterConfig::load_or_default(),
    };

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(port) = args.port {
        config.server.set_port(port)?;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.server.log_level).context("Failed to setup logging")?;

    info!("temper-exporter v{}", env!("CARGO_PKG_VERSION"));

    if args.list_sticks {
        return tokio::task::spawn_blocking(list_sticks)
            .await
            .context("Stick listing task failed")?;
    }

    run(config).await
}

/// Print the stick catalog and exit
fn list_sticks() -> Result<()> {
    let context = DeviceContext::open().context("Failed to open USB context")?;
    let sticks = context
        .catalog()
        .enumerate()
        .context("Failed to enumerate USB devices")?;

    if sticks.is_empty() {
        println!("No TEMPer sticks found.");
    } else {
        println!("Found {} TEMPer stick(s):\n", sticks.len());
        for stick in &sticks {
            println!(
                "  [{}] {} - Bus {:03} Device {:03}",
                stick.index(),
                stick.identity(),
                stick.bus_number(),
                stick.address()
            );
        }
    }

    context.close();
    Ok(())
}

async fn run(config: ExporterConfig) -> Result<()> {
    let listen_addr = config.server.socket_addr()?;
    let readings = Readings::shared();
    let (bridge, end) = create_poller_bridge();

    let poller = spawn_poller(config.polling.clone(), readings.clone(), end)
        .context("Failed to spawn poller thread")?;

    if let Err(e) = wait_until_ready(&bridge).await {
        join_poller(poller).await;
        return Err(e).context("Failed to initialize sticks");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = HttpServer::new(readings, listen_addr, config.server.metrics_path.clone());
    let mut server_task = tokio::spawn(server.run(shutdown_rx));
    let mut server_done = false;

    info!("Press Ctrl+C to shutdown");

    let outcome = tokio::select! {
        result = shutdown_signal() => {
            result.map(|()| info!("Received shutdown signal, shutting down gracefully..."))
        }
        reason = watch_poller(&bridge) => Err(anyhow!("Polling stopped: {}", reason)),
        result = &mut server_task => {
            server_done = true;
            match result {
                Ok(Ok(())) => Err(anyhow!("HTTP server exited unexpectedly")),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(anyhow!("HTTP server task failed: {}", e)),
            }
        }
    };

    let _ = shutdown_tx.send(true);
    if !server_done {
        match server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("HTTP server error: {:#}", e),
            Err(e) => error!("HTTP server task failed: {}", e),
        }
    }

    info!("Releasing sticks...");
    if let Err(e) = bridge.shutdown().await {
        warn!("{:#}", e);
    }
    join_poller(poller).await;

    info!("Shutdown complete");
    outcome
}

/// Wait for the poller's first round of readings
async fn wait_until_ready(bridge: &PollerBridge) -> Result<()> {
    while let Some(event) = bridge.next_event().await {
        match event {
            PollEvent::Ready { found, live } => {
                info!("Polling {} of {} stick(s)", live, found);
                return Ok(());
            }
            PollEvent::StickRetired { index, reason } => {
                warn!(stick = index, "Stick retired: {}", reason);
            }
            PollEvent::Failed { reason } => return Err(anyhow!(reason)),
        }
    }
    Err(anyhow!("Poller thread exited during startup"))
}

/// Log poller events until it reports a fatal failure
async fn watch_poller(bridge: &PollerBridge) -> String {
    while let Some(event) = bridge.next_event().await {
        match event {
            PollEvent::StickRetired { index, reason } => {
                warn!(stick = index, "Stick retired: {}", reason);
            }
            PollEvent::Failed { reason } => return reason,
            PollEvent::Ready { .. } => {}
        }
    }
    "poller thread exited".to_string()
}

async fn join_poller(poller: JoinHandle<Result<()>>) {
    match tokio::task::spawn_blocking(move || poller.join()).await {
        Ok(Ok(Ok(()))) => {}
        // Already reported through PollEvent::Failed
        Ok(Ok(Err(_))) => {}
        Ok(Err(e)) => error!("Poller thread panicked: {:?}", e),
        Err(e) => error!("Failed to join poller thread: {}", e),
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    Ok(())
}
