//! Replay engine
//!
//! One worker task per port, each with its own sender. All workers share one
//! start instant and sleep until cumulative deadlines, so time spent sending
//! never pushes later messages back.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use network::{FrameSender, SenderConfig, SimpleSender, StopSignal, TransportKind, UdpSender};
use recording::{read_recording, TruncatedTail};
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};
use types::{duration_from_secs, RecordedEntry};

use crate::error::Result;
use crate::schedule::{PortRemap, PortSchedule, ReplaySchedule, DEFAULT_SUFFIX_DIGITS};

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Destination host for every port
    pub host: String,
    pub transport: TransportKind,
    pub ipv6: bool,
    /// Rewrite destination ports to this camera group
    pub camera_group: Option<u16>,
    pub suffix_digits: u32,
    /// TCP connection behaviour; its stop signal also stops replay
    pub sender: SenderConfig,
    /// Zero keeps the 4096-byte default
    pub udp_fragment_size: usize,
    pub inter_packet_delay: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            transport: TransportKind::Tcp,
            ipv6: false,
            camera_group: None,
            suffix_digits: DEFAULT_SUFFIX_DIGITS,
            sender: SenderConfig::default(),
            udp_fragment_size: 0,
            inter_packet_delay: Duration::ZERO,
        }
    }
}

impl ReplayOptions {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            ..Self::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_camera_group(mut self, group: Option<u16>) -> Self {
        self.camera_group = group;
        self
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.sender.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.sender.stop.clone()
    }
}

/// What a recording holds, without sending anything
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub total_messages: usize,
    /// `(port, messages)` in order of first appearance
    pub port_counts: Vec<(u16, usize)>,
    /// Camera group of the recorded ports, before any remap
    pub camera_group: Option<u16>,
    pub duration: f64,
    pub truncated: Option<TruncatedTail>,
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "total messages: {}", self.total_messages)?;
        match self.camera_group {
            Some(group) => writeln!(f, "camera group number: {group}")?,
            None => writeln!(f, "camera group number: unknown")?,
        }
        for (port, count) in &self.port_counts {
            writeln!(f, "port {port} has {count} messages")?;
        }
        write!(f, "duration: {:.3}s", self.duration)?;
        if let Some(tail) = &self.truncated {
            write!(
                f,
                "\ntruncated tail: {} byte(s) discarded at offset {}",
                tail.bytes, tail.offset
            )?;
        }
        Ok(())
    }
}

/// Result of replaying one port
#[derive(Debug, Clone, PartialEq)]
pub struct PortOutcome {
    pub port: u16,
    pub scheduled: usize,
    pub sent: usize,
    /// Why the worker stopped early, if it did
    pub error: Option<String>,
}

impl PortOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.sent == self.scheduled
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub ports: Vec<PortOutcome>,
    pub elapsed: Duration,
    pub stopped: bool,
}

impl ReplayReport {
    pub fn is_success(&self) -> bool {
        !self.stopped && self.ports.iter().all(PortOutcome::is_complete)
    }

    pub fn total_sent(&self) -> usize {
        self.ports.iter().map(|p| p.sent).sum()
    }

    pub fn failed_ports(&self) -> impl Iterator<Item = &PortOutcome> {
        self.ports.iter().filter(|p| p.error.is_some())
    }
}

pub struct ReplayEngine {
    schedule: ReplaySchedule,
    analysis: Analysis,
    options: ReplayOptions,
}

impl ReplayEngine {
    /// Parse a skaibin file and build the schedule
    pub fn from_file(path: impl AsRef<Path>, options: ReplayOptions) -> Result<Self> {
        let path = path.as_ref();
        let parsed = read_recording(path)?;
        info!(
            path = %path.display(),
            messages = parsed.entries.len(),
            "Parsed recording"
        );
        if let Some(tail) = &parsed.truncated {
            warn!(
                offset = tail.offset,
                bytes = tail.bytes,
                recovered = parsed.entries.len(),
                "Recording ends mid-record"
            );
        }
        Self::build(&parsed.entries, parsed.truncated, options)
    }

    pub fn from_entries(entries: &[RecordedEntry], options: ReplayOptions) -> Result<Self> {
        Self::build(entries, None, options)
    }

    fn build(
        entries: &[RecordedEntry],
        truncated: Option<TruncatedTail>,
        options: ReplayOptions,
    ) -> Result<Self> {
        let schedule = ReplaySchedule::build(entries)?;
        let analysis = Analysis {
            total_messages: schedule.total_messages(),
            port_counts: schedule.ports().map(|p| (p.port, p.len())).collect(),
            camera_group: schedule.camera_group(options.suffix_digits),
            duration: schedule.duration(),
            truncated,
        };

        let schedule = match options.camera_group {
            Some(group) => {
                let remap = PortRemap::new(group, options.suffix_digits)?;
                let remapped = schedule.remap(&remap)?;
                info!(group, ports = ?remapped.port_numbers(), "Remapped camera group");
                remapped
            }
            None => schedule,
        };

        Ok(Self {
            schedule,
            analysis,
            options,
        })
    }

    pub fn schedule(&self) -> &ReplaySchedule {
        &self.schedule
    }

    pub fn analyze(&self) -> &Analysis {
        &self.analysis
    }

    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    /// Replay over the configured transport and wait for every port
    pub async fn run(&self) -> ReplayReport {
        let host = self.options.host.clone();
        let ipv6 = self.options.ipv6;
        match self.options.transport {
            TransportKind::Tcp => {
                let config = self.options.sender.clone();
                self.run_with(move |port| {
                    let host = host.clone();
                    let config = config.clone();
                    async move { SimpleSender::connect_tcp(host, port, ipv6, config).await }
                })
                .await
            }
            TransportKind::Udp => {
                let fragment_size = self.options.udp_fragment_size;
                let delay = self.options.inter_packet_delay;
                self.run_with(move |port| {
                    let host = host.clone();
                    async move {
                        Ok(UdpSender::to_host(&host, port, ipv6)
                            .await?
                            .with_fragment_size(fragment_size)
                            .with_inter_packet_delay(delay))
                    }
                })
                .await
            }
        }
    }

    /// Replay using senders produced by `connect(port)`
    pub async fn run_with<F, Fut, S>(&self, connect: F) -> ReplayReport
    where
        F: Fn(u16) -> Fut,
        Fut: Future<Output = network::Result<S>> + Send + 'static,
        S: FrameSender + 'static,
    {
        let stop = self.options.stop_signal();
        let origin = Instant::now();
        info!(
            ports = self.schedule.port_numbers().len(),
            messages = self.schedule.total_messages(),
            transport = %self.options.transport,
            "Starting replay"
        );

        let workers: Vec<_> = self
            .schedule
            .ports()
            .map(|schedule| {
                let port = schedule.port;
                let worker = tokio::spawn(replay_port(
                    schedule.clone(),
                    connect(port),
                    origin,
                    stop.clone(),
                ));
                (port, schedule.len(), worker)
            })
            .collect();

        let mut ports = Vec::with_capacity(workers.len());
        for (port, scheduled, worker) in workers {
            let outcome = worker.await.unwrap_or_else(|e| PortOutcome {
                port,
                scheduled,
                sent: 0,
                error: Some(format!("worker panicked: {e}")),
            });
            ports.push(outcome);
        }

        let report = ReplayReport {
            ports,
            elapsed: origin.elapsed(),
            stopped: stop.is_set(),
        };
        info!(
            sent = report.total_sent(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            stopped = report.stopped,
            "Replay finished"
        );
        report
    }
}

async fn replay_port<Fut, S>(
    schedule: PortSchedule,
    connect: Fut,
    origin: Instant,
    stop: StopSignal,
) -> PortOutcome
where
    Fut: Future<Output = network::Result<S>>,
    S: FrameSender,
{
    let port = schedule.port;
    let mut outcome = PortOutcome {
        port,
        scheduled: schedule.len(),
        sent: 0,
        error: None,
    };

    let mut sender = match connect.await {
        Ok(sender) => sender,
        Err(e) => {
            error!(port, error = %e, "Replay worker could not connect");
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };
    info!(port, destination = %sender.destination(), messages = outcome.scheduled, "Replaying port");

    let mut deadline = origin;
    for message in schedule.messages {
        deadline += duration_from_secs(message.wait);
        tokio::select! {
            _ = sleep_until(deadline) => {}
            _ = stop.wait() => {
                info!(port, sent = outcome.sent, "Replay stopped");
                return outcome;
            }
        }

        if let Err(e) = sender.send_payload(message.payload).await {
            error!(port, sent = outcome.sent, error = %e, "Replay send failed");
            outcome.error = Some(e.to_string());
            return outcome;
        }
        outcome.sent += 1;
    }

    info!(port, sent = outcome.sent, "Done sending messages");
    outcome
}
