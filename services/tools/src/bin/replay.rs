//! Replay a skaibin recording to live listeners
//!
//! Usage:
//!   skai-replay session.skaibin tcp
//!   skai-replay session.skaibin udp --camera-group 3
//!   skai-replay session.skaibin tcp --analyze-only --list

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::load_config;
use network::StopSignal;
use recording::{describe, read_recording};
use replay::ReplayEngine;
use skai_tools::{init_logging, registry_from_channels, replay_options, stop_on_ctrl_c};
use tracing::{error, info};
use types::TransportKind;

#[derive(Parser, Debug)]
#[command(name = "skai-replay")]
#[command(about = "Replay recorded Skai messages with their original timing")]
#[command(version)]
struct Args {
    /// skaibin file to replay from
    file: PathBuf,

    /// Transport to replay over (tcp or udp)
    transport: TransportKind,

    /// Print per-port message counts without sending anything
    #[arg(long)]
    analyze_only: bool,

    /// Send to this camera group instead of the recorded one
    #[arg(long)]
    camera_group: Option<u16>,

    /// Print every recorded message with its channel name
    #[arg(long)]
    list: bool,

    /// Destination host
    #[arg(long)]
    host: Option<String>,

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

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    if args.list {
        let registry = registry_from_channels(&config.channels)?;
        let parsed = read_recording(&args.file)
            .with_context(|| format!("Cannot read {}", args.file.display()))?;
        for message in describe(&parsed.entries, &registry) {
            println!("{message}");
        }
    }

    let stop = StopSignal::new();
    let mut options = replay_options(&config, args.transport, stop.clone());
    if let Some(host) = args.host {
        options.host = host;
    }
    if args.camera_group.is_some() {
        options.camera_group = args.camera_group;
    }

    info!(file = %args.file.display(), transport = %args.transport, "Replaying recording");
    let engine = ReplayEngine::from_file(&args.file, options)
        .with_context(|| format!("Cannot replay {}", args.file.display()))?;
    println!("{}", engine.analyze());

    if args.analyze_only {
        info!("Analyze only enabled, not replaying");
        return Ok(());
    }

    stop_on_ctrl_c(stop);
    let report = engine.run().await;
    for port in &report.ports {
        match &port.error {
            None => println!("port {}: sent {}/{}", port.port, port.sent, port.scheduled),
            Some(e) => {
                error!(port = port.port, error = %e, "Port replay failed");
                println!(
                    "port {}: sent {}/{} ({e})",
                    port.port, port.sent, port.scheduled
                );
            }
        }
    }

    if report.stopped {
        info!(sent = report.total_sent(), "Replay interrupted");
    } else if !report.is_success() {
        bail!("replay failed on {} port(s)", report.failed_ports().count());
    }
    Ok(())
}
