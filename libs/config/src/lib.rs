//! # Skai Transport Configuration
//!
//! Central configuration for listeners, senders and replay, with the default
//! channel table used across the pipeline.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use config::load_config;
//!
//! // Defaults, then skai.toml, then SKAI__* environment overrides
//! let config = load_config(Some("skai.toml".as_ref())).unwrap();
//! let ports = config.listener_ports();
//! ```

pub mod channels;
pub mod settings;

pub use channels::{default_channels, ChannelSettings};
pub use settings::{
    load_config, ListenerSettings, ReplaySettings, SenderSettings, SkaiConfig,
};
