//! Channel table: which message type is served on which ports

use serde::{Deserialize, Serialize};

/// One configured channel
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub name: String,
    pub type_id: u16,
    /// Broadcast ports, or command ports when `response_ports` is set
    pub ports: Vec<u16>,
    #[serde(default)]
    pub response_ports: Vec<u16>,
}

impl ChannelSettings {
    pub fn new(name: impl Into<String>, type_id: u16, port: u16) -> Self {
        Self {
            name: name.into(),
            type_id,
            ports: vec![port],
            response_ports: Vec::new(),
        }
    }

    pub fn is_duplex(&self) -> bool {
        !self.response_ports.is_empty()
    }

    pub fn all_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().chain(self.response_ports.iter()).copied()
    }
}

/// Message types of the vision pipeline and their default ports
pub fn default_channels() -> Vec<ChannelSettings> {
    vec![
        ChannelSettings::new("SKAIMOT", 1, 6940),
        ChannelSettings::new("POSE", 2, 6941),
        ChannelSettings::new("FEETPOS", 3, 6969),
        ChannelSettings::new("LOCALTRACK", 4, 7000),
        ChannelSettings::new("GLOBALTRACK", 5, 7020),
    ]
}
