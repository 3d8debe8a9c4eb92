//! Replay schedule
//!
//! Recorded entries are grouped by port and sorted by timestamp. Each port
//! gets a list of `(wait, payload)` pairs where the first wait is measured from
//! the earliest timestamp across *all* ports and every later wait from the
//! previous message on the same port. Replaying the ports concurrently from a
//! common start therefore reproduces the recorded cross-port skew.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use types::RecordedEntry;

use crate::error::{ReplayError, Result};

/// Digits of a port number that carry the camera group
pub const DEFAULT_SUFFIX_DIGITS: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledMessage {
    /// Seconds to wait after the previous message on this port
    pub wait: f64,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortSchedule {
    pub port: u16,
    pub messages: Vec<ScheduledMessage>,
}

impl PortSchedule {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Offset of the last message from the shared origin
    pub fn span(&self) -> f64 {
        self.messages.iter().map(|m| m.wait).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySchedule {
    /// Ports in order of first appearance in the recording
    ports: Vec<PortSchedule>,
    t0: f64,
}

impl ReplaySchedule {
    pub fn build(entries: &[RecordedEntry]) -> Result<Self> {
        let mut index: HashMap<u16, usize> = HashMap::new();
        let mut grouped: Vec<(u16, Vec<(f64, Bytes)>)> = Vec::new();
        for entry in entries {
            let slot = *index.entry(entry.port).or_insert_with(|| {
                grouped.push((entry.port, Vec::new()));
                grouped.len() - 1
            });
            grouped[slot].1.push((entry.timestamp, entry.payload.clone()));
        }

        // Stable: equal timestamps keep their recorded order
        for (_, list) in &mut grouped {
            list.sort_by(|a, b| a.0.total_cmp(&b.0));
        }

        let t0 = grouped
            .iter()
            .filter_map(|(_, list)| list.first().map(|(ts, _)| *ts))
            .min_by(|a, b| a.total_cmp(b))
            .ok_or(ReplayError::EmptyRecording)?;

        let ports = grouped
            .into_iter()
            .map(|(port, list)| {
                let mut previous = t0;
                let messages = list
                    .into_iter()
                    .map(|(timestamp, payload)| {
                        let wait = timestamp - previous;
                        previous = timestamp;
                        ScheduledMessage { wait, payload }
                    })
                    .collect();
                PortSchedule { port, messages }
            })
            .collect();

        Ok(Self { ports, t0 })
    }

    /// Earliest recorded timestamp
    pub fn t0(&self) -> f64 {
        self.t0
    }

    pub fn ports(&self) -> impl Iterator<Item = &PortSchedule> {
        self.ports.iter()
    }

    pub fn port(&self, port: u16) -> Option<&PortSchedule> {
        self.ports.iter().find(|p| p.port == port)
    }

    pub fn port_numbers(&self) -> Vec<u16> {
        self.ports.iter().map(|p| p.port).collect()
    }

    pub fn total_messages(&self) -> usize {
        self.ports.iter().map(PortSchedule::len).sum()
    }

    /// Seconds from the first to the last message
    pub fn duration(&self) -> f64 {
        self.ports
            .iter()
            .map(PortSchedule::span)
            .fold(0.0, f64::max)
    }

    /// Camera group of the first recorded port
    pub fn camera_group(&self, suffix_digits: u32) -> Option<u16> {
        self.ports
            .first()
            .and_then(|p| camera_group_of(p.port, suffix_digits))
    }

    /// Rewrite every port's camera group suffix
    pub fn remap(self, remap: &PortRemap) -> Result<Self> {
        let targets = remap.apply_all(&self.port_numbers())?;
        let ports = self
            .ports
            .into_iter()
            .zip(targets)
            .map(|(schedule, port)| PortSchedule {
                port,
                messages: schedule.messages,
            })
            .collect();
        Ok(Self { ports, t0: self.t0 })
    }
}

impl fmt::Display for ReplaySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for port in &self.ports {
            writeln!(f, "port {} has {} messages", port.port, port.len())?;
        }
        Ok(())
    }
}

/// Camera group carried by the last `suffix_digits` digits of `port`.
///
/// `None` when the port has no digits left in front of the suffix.
pub fn camera_group_of(port: u16, suffix_digits: u32) -> Option<u16> {
    let modulus = 10u32.checked_pow(suffix_digits)?;
    let port = u32::from(port);
    (suffix_digits > 0 && port >= modulus).then(|| (port % modulus) as u16)
}

/// Replaces the camera group suffix of each destination port
///
/// With two suffix digits, group 5 maps 6940 to 6905 and 7020 to 7005.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRemap {
    group: u16,
    suffix_digits: u32,
}

impl PortRemap {
    pub fn new(group: u16, suffix_digits: u32) -> Result<Self> {
        let fits = (1..=4).contains(&suffix_digits) && u32::from(group) < 10u32.pow(suffix_digits);
        if !fits {
            return Err(ReplayError::InvalidCameraGroup {
                group,
                suffix_digits,
            });
        }
        Ok(Self {
            group,
            suffix_digits,
        })
    }

    pub fn group(&self) -> u16 {
        self.group
    }

    pub fn suffix_digits(&self) -> u32 {
        self.suffix_digits
    }

    pub fn apply(&self, port: u16) -> Result<u16> {
        let modulus = 10u32.pow(self.suffix_digits);
        let source = u32::from(port);
        if source < modulus {
            return Err(ReplayError::invalid_port(
                port,
                format!("needs more than {} digit(s) to carry a camera group", self.suffix_digits),
            ));
        }
        let target = source / modulus * modulus + u32::from(self.group);
        u16::try_from(target)
            .map_err(|_| ReplayError::invalid_port(port, format!("remapped port {target} is out of range")))
    }

    /// Remap distinct ports, preserving order.
    ///
    /// Fails with [`ReplayError::RemapCollision`] when two ports land on the
    /// same target.
    pub fn apply_all(&self, ports: &[u16]) -> Result<Vec<u16>> {
        let mut owners: HashMap<u16, u16> = HashMap::with_capacity(ports.len());
        let mut targets = Vec::with_capacity(ports.len());
        for &port in ports {
            let target = self.apply(port)?;
            if let Some(first) = owners.insert(target, port) {
                return Err(ReplayError::RemapCollision {
                    target,
                    first,
                    second: port,
                });
            }
            targets.push(target);
        }
        Ok(targets)
    }
}
