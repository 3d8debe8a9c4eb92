//! Listen on the configured channel ports and log what arrives
//!
//! Usage:
//!   skai-listen tcp
//!   skai-listen udp --ports 6940,6941 --record captures/session.skaibin
//!   skai-listen tcp --camera-group 3 --decoupled

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use config::load_config;
use network::{InboundMessage, Listener, StopSignal};
use skai_tools::{
    init_logging, listener_config, ports_for_camera_group, registry_from_channels, stop_on_ctrl_c,
};
use tracing::info;
use types::TransportKind;

#[derive(Parser, Debug)]
#[command(name = "skai-listen")]
#[command(about = "Receive Skai messages on one or more ports")]
#[command(version)]
struct Args {
    /// Transport to listen on (tcp or udp)
    transport: TransportKind,

    /// Ports to listen on; defaults to every configured channel port
    #[arg(long, value_delimiter = ',')]
    ports: Vec<u16>,

    /// Listen on this camera group's ports
    #[arg(long)]
    camera_group: Option<u16>,

    /// Record verified messages to a .skaibin file
    #[arg(long)]
    record: Option<PathBuf>,

    /// Append to an existing recording
    #[arg(long)]
    append: bool,

    /// Verify and deliver on a dedicated dispatcher thread
    #[arg(long)]
    decoupled: bool,

    /// Bind IPv6 instead of IPv4
    #[arg(long)]
    ipv6: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs)?;

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if args.record.is_some() {
        config.listener.record_path = args.record.clone();
        config.listener.append = args.append;
    }
    config.listener.decoupled |= args.decoupled;
    config.listener.ipv6 |= args.ipv6;

    let mut ports = if args.ports.is_empty() {
        config.listener_ports()
    } else {
        args.ports.clone()
    };
    if let Some(group) = args.camera_group {
        ports = ports_for_camera_group(&ports, group, config.replay.suffix_digits)?;
    }

    let registry = Arc::new(registry_from_channels(&config.channels)?);
    let names = registry.clone();
    let stop = StopSignal::new();
    let listener = listener_config(
        &config,
        ports,
        args.transport,
        Some(registry),
        stop.clone(),
    );

    let handle = Listener::start(listener, move |message: InboundMessage| {
        let name = names.name_of_payload(&message.payload).unwrap_or("UNKNOWN");
        info!(
            port = message.port,
            peer = ?message.peer_addr,
            channel = name,
            bytes = message.body().len(),
            "Received message"
        );
    })
    .await
    .context("Failed to start listener")?;
    info!(ports = ?handle.ports(), transport = %args.transport, "Listening, press Ctrl-C to stop");

    stop_on_ctrl_c(stop);
    let stats = handle.join().await?;
    println!(
        "received {} message(s), {} checksum failure(s), {} unknown type(s)",
        stats.messages, stats.checksum_failures, stats.unknown_types
    );
    Ok(())
}
