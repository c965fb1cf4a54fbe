//! Stream a device's logs until Ctrl-C.
//!
//! Run with: cargo run -p tail-device-demo -- device.toml
//!
//! See `device.example.toml` for the configuration format. A target given
//! as `--target user@host[:port]` overrides the `[device]` section.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use device_logs_core::{ConnectParams, LogSink, TailConfig};
use device_logs_session::{
    Tailer,
    storage::{MemorySink, SqliteSink},
};
use device_logs_ssh::SshTransport;
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Deserialize)]
struct DemoConfig {
    device: ConnectParams,
    #[serde(default)]
    tail: TailConfig,
    database: Option<String>,
}

/// Stream a device's logs until Ctrl-C.
#[derive(Debug, Parser)]
#[command(name = "tail-device")]
#[command(about = "Stream a remote device's logs into a sink", long_about = None)]
struct Args {
    /// TOML file with `[device]` and `[tail]` tables.
    #[arg(default_value = "device.toml")]
    config: PathBuf,

    /// Override the device address, as `user@host[:port]`.
    #[arg(long)]
    target: Option<ConnectParams>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let mut config: DemoConfig = toml::from_str(&raw).context("parsing config")?;

    if let Some(target) = args.target {
        config.device = ConnectParams {
            credential: config.device.credential,
            connect_timeout: config.device.connect_timeout,
            ..target
        };
    }

    let sink: Arc<dyn LogSink> = match &config.database {
        Some(url) => Arc::new(SqliteSink::new(url).await?),
        None => Arc::new(MemorySink::new()),
    };

    let tailer = Tailer::new(SshTransport::default(), config.device, config.tail, sink)?;
    tailer.start().await?;

    let mut states = tailer.subscribe_connection_state();
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                tracing::info!(state = ?*states.borrow(), "Connection state changed");
            }
        }
    }

    tailer.stop().await;
    Ok(())
}
