//! Service Configuration Module
//!
//! Loads the transport configuration from TOML with `SKAI__` environment
//! overrides, fills every omitted field from defaults, and validates the
//! result before any socket is opened.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use types::TransportKind;

use crate::channels::{default_channels, ChannelSettings};

/// Smallest frame limit that still admits a type id and checksum
const MIN_FRAME_SIZE: usize = 18;

/// Top-level configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SkaiConfig {
    #[serde(default)]
    pub listener: ListenerSettings,

    #[serde(default)]
    pub sender: SenderSettings,

    #[serde(default)]
    pub replay: ReplaySettings,

    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelSettings>,
}

impl Default for SkaiConfig {
    fn default() -> Self {
        Self {
            listener: ListenerSettings::default(),
            sender: SenderSettings::default(),
            replay: ReplaySettings::default(),
            channels: default_channels(),
        }
    }
}

/// Listener settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ListenerSettings {
    /// Ports to listen on; empty means every configured channel port
    pub ports: Vec<u16>,
    pub transport: TransportKind,
    /// Bind `[::]` instead of `0.0.0.0`
    pub ipv6: bool,
    /// Log every received message at debug level
    pub verbose: bool,
    /// Run the dispatcher on its own thread, away from socket reads
    pub decoupled: bool,
    /// Record verified payloads to this `.skaibin` file
    pub record_path: Option<PathBuf>,
    /// Append to an existing recording instead of truncating it
    pub append: bool,
    pub max_frame_size: usize,
    /// Drop payloads whose type id has no configured channel
    pub drop_unknown_types: bool,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            transport: TransportKind::Tcp,
            ipv6: false,
            verbose: false,
            decoupled: false,
            record_path: None,
            append: false,
            max_frame_size: 64 * 1024 * 1024,
            drop_unknown_types: true,
        }
    }
}

/// Sender settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SenderSettings {
    pub host: String,
    /// Retries after the first failed connect; unset retries forever
    pub initial_retry_limit: Option<u32>,
    /// Retries when re-establishing a dropped connection; unset retries forever
    pub reconnect_retry_limit: Option<u32>,
    pub retry_backoff_secs: f64,
    pub ipv6: bool,
    /// Wait for the first connection before returning from construction
    pub blocking_connect: bool,
    /// Pause between UDP datagrams; zero only yields
    pub inter_packet_delay_us: u64,
    pub fragment_size: usize,
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            initial_retry_limit: None,
            reconnect_retry_limit: Some(3),
            retry_backoff_secs: 2.0,
            ipv6: false,
            blocking_connect: true,
            inter_packet_delay_us: 0,
            fragment_size: 4096,
        }
    }
}

/// Replay settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReplaySettings {
    pub host: String,
    pub transport: TransportKind,
    /// Rewrite recorded ports to this camera group
    pub camera_group: Option<u16>,
    /// Trailing decimal digits of a port that encode the camera group
    pub suffix_digits: u32,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            transport: TransportKind::Tcp,
            camera_group: None,
            suffix_digits: 2,
        }
    }
}

impl SkaiConfig {
    /// Parse a single TOML file, no environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Layered load: defaults, optional TOML file, then `SKAI__SECTION__KEY`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading configuration: {:?}", path);
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SKAI")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Expand `~` and `$VARS` in path values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        if let Some(path) = &self.listener.record_path {
            let raw = path.to_string_lossy();
            let expanded =
                shellexpand::full(&raw).context("Failed to expand record path")?;
            let expanded = PathBuf::from(expanded.as_ref());
            debug!(?expanded, "Expanded record path");
            self.listener.record_path = Some(expanded);
        }
        Ok(())
    }

    /// Ports the listener should bind, falling back to every channel port
    pub fn listener_ports(&self) -> Vec<u16> {
        if !self.listener.ports.is_empty() {
            return self.listener.ports.clone();
        }
        let mut ports: Vec<u16> = self
            .channels
            .iter()
            .flat_map(|c| c.all_ports())
            .collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    pub fn channel(&self, type_id: u16) -> Option<&ChannelSettings> {
        self.channels.iter().find(|c| c.type_id == type_id)
    }

    pub fn validate(&self) -> Result<()> {
        let mut type_ids = HashSet::new();
        let mut ports = HashSet::new();
        for channel in &self.channels {
            if channel.ports.is_empty() {
                bail!("channel '{}' has no ports", channel.name);
            }
            if !type_ids.insert(channel.type_id) {
                bail!("duplicate channel type_id {}", channel.type_id);
            }
            for port in channel.all_ports() {
                if !ports.insert(port) {
                    bail!("port {} is assigned to more than one channel", port);
                }
            }
        }

        let mut seen = HashSet::new();
        for port in &self.listener.ports {
            if !seen.insert(*port) {
                bail!("listener port {} listed twice", port);
            }
        }

        if self.listener.max_frame_size < MIN_FRAME_SIZE {
            bail!("listener.max_frame_size must be >= {}", MIN_FRAME_SIZE);
        }

        if !self.sender.retry_backoff_secs.is_finite() || self.sender.retry_backoff_secs < 0.0 {
            bail!("sender.retry_backoff_secs must be a non-negative number");
        }

        if self.sender.fragment_size == 0 {
            bail!("sender.fragment_size must be > 0");
        }

        if !(1..=4).contains(&self.replay.suffix_digits) {
            bail!("replay.suffix_digits must be between 1 and 4");
        }

        Ok(())
    }
}

/// Load, expand and validate configuration; `None` uses defaults plus
/// environment overrides
pub fn load_config(path: Option<&Path>) -> Result<SkaiConfig> {
    let mut config = SkaiConfig::load(path)?;
    config.expand_env_vars()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = SkaiConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sender.reconnect_retry_limit, Some(3));
        assert_eq!(config.sender.initial_retry_limit, None);
        assert_eq!(config.sender.retry_backoff_secs, 2.0);
        assert_eq!(config.listener_ports(), vec![6940, 6941, 6969, 7000, 7020]);
        assert_eq!(config.channel(4).map(|c| c.name.as_str()), Some("LOCALTRACK"));
    }

    #[test]
    fn test_unknown_types_dropped_by_default() {
        assert!(ListenerSettings::default().drop_unknown_types);

        let config: SkaiConfig = toml::from_str("[listener]\nverbose = true\n").unwrap();
        assert!(config.listener.drop_unknown_types);

        let config: SkaiConfig =
            toml::from_str("[listener]\ndrop_unknown_types = false\n").unwrap();
        assert!(!config.listener.drop_unknown_types);
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("skai.toml");

        let config_content = r#"
[listener]
ports = [6940, 6941]
decoupled = true
record_path = "/tmp/out.skaibin"

[sender]
host = "10.0.0.5"
reconnect_retry_limit = 5
retry_backoff_secs = 1
"#;
        fs::write(&config_path, config_content).unwrap();

        let config = SkaiConfig::from_file(&config_path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.listener.ports, vec![6940, 6941]);
        assert!(config.listener.decoupled);
        assert_eq!(config.listener.transport, TransportKind::Tcp);
        assert_eq!(config.sender.host, "10.0.0.5");
        assert_eq!(config.sender.reconnect_retry_limit, Some(5));
        assert_eq!(config.sender.retry_backoff_secs, 1.0);
        assert!(config.sender.blocking_connect);
        assert_eq!(config.channels.len(), 5);
    }

    #[test]
    fn test_load_layered_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("skai.toml");
        fs::write(
            &config_path,
            r#"
[replay]
transport = "udp"
camera_group = 3

[[channels]]
name = "CONTROL"
type_id = 9
ports = [7500]
response_ports = [7501]
"#,
        )
        .unwrap();

        let config = SkaiConfig::load(Some(&config_path)).unwrap();
        assert_eq!(config.replay.transport, TransportKind::Udp);
        assert_eq!(config.replay.camera_group, Some(3));
        assert_eq!(config.channels.len(), 1);
        assert!(config.channels[0].is_duplex());
        assert_eq!(config.listener_ports(), vec![7500, 7501]);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = SkaiConfig::default();
        config.channels.push(ChannelSettings::new("DUP", 1, 9000));
        assert!(config.validate().is_err());

        let mut config = SkaiConfig::default();
        config.channels.push(ChannelSettings::new("CLASH", 9, 6940));
        assert!(config.validate().is_err());

        let mut config = SkaiConfig::default();
        config.listener.ports = vec![6940, 6940];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = SkaiConfig::default();
        config.sender.retry_backoff_secs = -1.0;
        assert!(config.validate().is_err());

        let mut config = SkaiConfig::default();
        config.replay.suffix_digits = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_record_path() {
        let mut config = SkaiConfig::default();
        config.listener.record_path = Some(PathBuf::from("/data/rec.skaibin"));
        config.expand_env_vars().unwrap();
        assert_eq!(
            config.listener.record_path,
            Some(PathBuf::from("/data/rec.skaibin"))
        );
    }
}
