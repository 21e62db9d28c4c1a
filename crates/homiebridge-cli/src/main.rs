//! Command-line interface for HomieBridge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use homiebridge_core::config::env_vars;
use homiebridge_core::BridgeConfig;
use homiebridge_devices::{
    BridgeError, HomieProjector, InboundMessage, MqttTransport, ProjectionWorker, WorkerStats,
};
use homiebridge_storage::Error as StorageError;

/// HomieBridge - Project Homie MQTT devices into a local device store.
#[derive(Parser, Debug)]
#[command(name = "homiebridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to ./config.toml, then environment variables).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the database path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the broker and project Homie messages until Ctrl-C.
    Run,
    /// Print the projected devices.
    Devices {
        /// Print JSON instead of a listing.
        #[arg(long)]
        json: bool,
        /// Include clusters and attributes.
        #[arg(short, long)]
        detail: bool,
    },
    /// Feed `topic<TAB>payload` lines from a file through the projector.
    Replay {
        /// File to replay.
        #[arg(required = true)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(args.config.as_deref(), args.db)?;

    match args.command {
        Command::Run => run_bridge(config).await,
        Command::Devices { json, detail } => list_devices(&config, json, detail),
        Command::Replay { path } => replay_file(config, &path).await,
    }
}

fn init_logging(verbose: bool) {
    // JSON logging for production/container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("homiebridge={}", default_level))
            .add_directive(tracing::Level::WARN.into())
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}

fn load_config(path: Option<&Path>, db: Option<PathBuf>) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::load(path).context("Failed to load configuration")?;
    if let Some(db) = db {
        config.storage.db_path = db;
    }
    Ok(config)
}

/// Open the device store.
///
/// redb allows one process per file, so `devices` and `replay` only work
/// while no `homiebridge run` holds the same store.
fn open_projector(config: &BridgeConfig) -> Result<Arc<HomieProjector>> {
    let db_path = &config.storage.db_path;
    match HomieProjector::from_config(config) {
        Ok(projector) => Ok(Arc::new(projector)),
        Err(BridgeError::Storage(StorageError::Locked(_))) => anyhow::bail!(
            "Device store {} is locked: the bridge is running (stop `homiebridge run` first)",
            db_path.display()
        ),
        Err(e) => Err(e)
            .with_context(|| format!("Failed to open device store {}", db_path.display())),
    }
}

/// Run the transport and the worker until Ctrl-C.
async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let projector = open_projector(&config)?;

    let (tx, rx) = mpsc::channel(config.worker.channel_capacity);
    let (stop_tx, stop_rx) = watch::channel(false);

    let worker = ProjectionWorker::new(projector, rx, stop_rx.clone())
        .with_report_every(config.worker.report_every)
        .spawn();
    let transport = tokio::spawn(MqttTransport::new(config.mqtt.clone(), tx, stop_rx).run());

    info!(
        "HomieBridge running: broker {}, topics {}, store {}",
        config.mqtt.broker_addr(),
        config.mqtt.subscription_filter(),
        config.storage.db_path.display()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    let _ = stop_tx.send(true);

    if let Err(e) = transport.await? {
        warn!("MQTT transport ended with error: {}", e);
    }
    let stats = worker.await?;
    print_stats("Processed", &stats);
    Ok(())
}

fn list_devices(config: &BridgeConfig, json: bool, detail: bool) -> Result<()> {
    let projector = open_projector(config)?;
    let devices = projector.list_devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices");
        return Ok(());
    }

    println!("{} device(s)", devices.len());
    for device in &devices {
        println!(
            "{}  name={}  state={}  homie={}  nodes={}",
            device.device_id,
            device.device_name.as_deref().unwrap_or("-"),
            device.state.as_deref().unwrap_or("-"),
            device.protocol_version.as_deref().unwrap_or("-"),
            device.node_list.as_deref().unwrap_or("-"),
        );
        if !detail {
            continue;
        }
        for cluster in projector.list_clusters(&device.device_id)? {
            println!(
                "  {}  properties={}",
                cluster.cluster_name,
                cluster.properties.as_deref().unwrap_or("-")
            );
            for attr in projector.list_attributes(&device.device_id, &cluster.cluster_name)? {
                println!(
                    "    {} = {}  datatype={}  settable={}  format={}",
                    attr.attribute_name,
                    attr.value.as_deref().unwrap_or("-"),
                    attr.datatype.as_deref().unwrap_or("-"),
                    attr.settable,
                    attr.format_info.as_deref().unwrap_or("-"),
                );
            }
        }
    }
    Ok(())
}

/// Split a replay line into topic and payload.
///
/// Blank lines and `#` comments yield `None`; a line without a tab is a
/// topic with an empty payload.
fn parse_replay_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }
    Some(line.split_once('\t').unwrap_or((line, "")))
}

/// Replay a recorded message file through the worker.
async fn replay_file(config: BridgeConfig, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let projector = open_projector(&config)?;

    let (tx, rx) = mpsc::channel(config.worker.channel_capacity);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let worker = ProjectionWorker::new(projector, rx, stop_rx)
        .with_report_every(0)
        .spawn();

    for (topic, payload) in content.lines().filter_map(parse_replay_line) {
        tx.send(InboundMessage::new(topic, payload))
            .await
            .context("Projection worker stopped early")?;
    }
    drop(tx);

    let stats = worker.await?;
    print_stats("Replayed", &stats);
    Ok(())
}

fn print_stats(verb: &str, stats: &WorkerStats) {
    println!(
        "{} {} messages: {} applied, {} ignored, {} rejected, {} failed",
        verb, stats.processed, stats.applied, stats.ignored, stats.rejected, stats.store_failed
    );
}
