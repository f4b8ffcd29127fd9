//! ThingSpeak forwarder.
//!
//! Subscribes to port updates on Zenoh and forwards the values of the
//! configured ports to a ThingSpeak channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use thingspeak_common::{LoggingConfig, PortTable};

use thingspeak_forwarder::{ForwarderConfig, HttpTransport, PortSubscriber, ValueForwarder};

/// Forward port values to ThingSpeak.
#[derive(Parser, Debug)]
#[command(name = "thingspeak-forwarder")]
#[command(about = "Forward port value changes to a ThingSpeak channel")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, default_value = "thingspeak.json5")]
    config: PathBuf,

    /// Channel write API key (overrides config).
    #[arg(long)]
    api_key: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ForwarderConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(api_key) = args.api_key {
        config.thingspeak.api_key = api_key;
        config.validate()?;
    }

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    thingspeak_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting ThingSpeak forwarder");
    info!(
        endpoint = %config.thingspeak.endpoint,
        mode = ?config.thingspeak.send_mode()?,
        fields = config.thingspeak.fields.len(),
        key_prefix = %config.subscription.key_prefix,
        "Configuration loaded"
    );

    let ports = Arc::new(PortTable::with_ports(config.thingspeak.fields.keys().cloned()));

    let transport = HttpTransport::new(&config.thingspeak.endpoint, config.thingspeak.timeout())
        .context("Failed to create HTTP client")?;
    let forwarder = ValueForwarder::new(&config.thingspeak, transport, ports.clone())?;

    let subscriber = PortSubscriber::new(
        forwarder,
        ports,
        config.zenoh.clone(),
        config.subscription.key_prefix.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut subscriber_task = tokio::spawn(subscriber.run(shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate_signal() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = &mut subscriber_task => {
            // Subscriber ended on its own; nothing left to shut down.
            return match result {
                Ok(Ok(stats)) => {
                    warn!(?stats, "Subscriber stopped unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(e) => Err(anyhow::anyhow!("Subscriber task failed: {}", e)),
            };
        }
    }

    shutdown_tx.send(true)?;

    match tokio::time::timeout(Duration::from_secs(5), subscriber_task).await {
        Ok(Ok(Ok(stats))) => info!(
            events_received = stats.events_received,
            events_ignored = stats.events_ignored,
            events_rate_limited = stats.events_rate_limited,
            sends_succeeded = stats.sends_succeeded,
            sends_failed = stats.sends_failed,
            values_dropped = stats.values_dropped,
            "Final statistics"
        ),
        Ok(Ok(Err(e))) => error!("Subscriber error: {}", e),
        Ok(Err(e)) => error!("Subscriber task failed: {}", e),
        Err(_) => warn!("Timed out waiting for subscriber to stop"),
    }

    info!("Forwarder stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
