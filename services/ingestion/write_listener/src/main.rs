//! Write listener entry point
//!
//! Serves the write API and prints every accepted record as line protocol on
//! stdout, together with periodic self stats.

use anyhow::Context;
use clap::Parser;
use line_protocol::Record;
use selfstat::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use torq_write_listener::{ChannelAccumulator, Delivery, WriteListener, WriteListenerConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the configuration file
    #[arg(long)]
    service_address: Option<String>,

    /// Ceiling on undelivered metrics (0 = unbounded)
    #[arg(long)]
    max_undelivered_metrics: Option<usize>,

    /// Require `Authorization: Token <token>` on writes
    #[arg(long, env = "WRITE_LISTENER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Tag name set from the `bucket` query parameter
    #[arg(long)]
    bucket_tag: Option<String>,

    /// Capacity of the hand-off channel to the output task
    #[arg(long, default_value_t = 10_000)]
    channel_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "torq_write_listener=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    info!("Starting Torq Write Listener");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = WriteListenerConfig::load(args.config.as_deref())
        .context("Failed to load write listener configuration")?;
    if let Some(address) = args.service_address {
        config.service_address = address;
    }
    if let Some(ceiling) = args.max_undelivered_metrics {
        config.max_undelivered_metrics = ceiling;
    }
    if let Some(token) = args.token {
        config.token = Some(token);
    }
    if let Some(tag) = args.bucket_tag {
        config.bucket_tag = tag;
    }
    config.validate()?;

    info!("Configuration loaded: {:?}", config);

    let registry = Arc::new(Registry::new());
    let (accumulator, deliveries) = ChannelAccumulator::new(args.channel_capacity);
    let listener = WriteListener::new(config, Arc::clone(&registry), Arc::new(accumulator));

    let (stop_output, stop_rx) = watch::channel(false);
    let output = tokio::spawn(run_output(
        deliveries,
        Arc::clone(&registry),
        tokio::io::stdout(),
        stop_rx,
    ));

    listener.start().await.context("Failed to start write listener")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C signal handler")?;
    info!("Shutdown signal received");

    listener.stop().await;
    stop_output.send_replace(true);
    if let Err(e) = output.await {
        error!("Output task failed: {}", e);
    }

    Ok(())
}

/// Print deliveries and periodic self stats until stopped
async fn run_output<W>(
    mut deliveries: mpsc::Receiver<Delivery>,
    registry: Arc<Registry>,
    mut out: W,
    mut stop: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    stats_tick.tick().await;

    loop {
        tokio::select! {
            delivery = deliveries.recv() => {
                let Some(delivery) = delivery else { break };
                write_delivery(&mut out, delivery).await;
            }
            _ = stats_tick.tick() => {
                for record in registry.snapshot() {
                    if let Err(e) = write_record(&mut out, &record).await {
                        warn!("Failed to write self stats: {}", e);
                    }
                }
            }
            _ = stop.changed() => break,
        }
    }

    // Resolve what is still queued so no slot stays taken
    deliveries.close();
    while let Some(delivery) = deliveries.recv().await {
        write_delivery(&mut out, delivery).await;
    }
    if let Err(e) = out.flush().await {
        warn!("Failed to flush output: {}", e);
    }
}

async fn write_delivery<W: AsyncWrite + Unpin>(out: &mut W, delivery: Delivery) {
    let (record, token) = delivery.into_parts();
    match write_record(out, &record).await {
        Ok(()) => token.accept(),
        Err(e) => {
            warn!("Failed to write record {}: {}", record.name, e);
            token.reject();
        }
    }
}

async fn write_record<W: AsyncWrite + Unpin>(out: &mut W, record: &Record) -> std::io::Result<()> {
    let mut line = record.to_string();
    line.push('\n');
    out.write_all(line.as_bytes()).await
}
