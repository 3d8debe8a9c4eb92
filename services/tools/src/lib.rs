//! Shared plumbing for the `skai-listen` and `skai-replay` binaries:
//! logging setup and conversion from file settings to runtime configs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use codec::{ChannelPorts, ChannelRegistry, RawCodec};
use config::{ChannelSettings, SenderSettings, SkaiConfig};
use network::{ConcurrencyModel, ListenerConfig, SenderConfig, StopSignal};
use replay::{PortRemap, ReplayOptions};
use tracing_subscriber::EnvFilter;
use types::{duration_from_secs, TransportKind};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

/// Registry of pass-through codecs for the configured channel table
pub fn registry_from_channels(channels: &[ChannelSettings]) -> Result<ChannelRegistry> {
    let mut registry = ChannelRegistry::new();
    for channel in channels {
        let ports = if channel.is_duplex() {
            ChannelPorts::Duplex {
                command: channel.ports.clone(),
                response: channel.response_ports.clone(),
            }
        } else {
            ChannelPorts::Broadcast(channel.ports.clone())
        };
        registry
            .register(RawCodec::new(channel.type_id, channel.name.clone(), ports))
            .with_context(|| format!("cannot register channel '{}'", channel.name))?;
    }
    Ok(registry)
}

pub fn sender_config(settings: &SenderSettings, stop: StopSignal) -> SenderConfig {
    SenderConfig::with_limits(
        settings.initial_retry_limit,
        settings.reconnect_retry_limit,
        duration_from_secs(settings.retry_backoff_secs),
    )
    .blocking(settings.blocking_connect)
    .with_stop(stop)
}

/// Rewrite each port's camera group suffix.
///
/// Two ports landing on the same target are rejected rather than merged.
pub fn ports_for_camera_group(ports: &[u16], group: u16, suffix_digits: u32) -> Result<Vec<u16>> {
    let remap = PortRemap::new(group, suffix_digits)?;
    Ok(remap.apply_all(ports)?)
}

pub fn listener_config(
    config: &SkaiConfig,
    ports: Vec<u16>,
    transport: TransportKind,
    registry: Option<Arc<ChannelRegistry>>,
    stop: StopSignal,
) -> ListenerConfig {
    let settings = &config.listener;
    let model = if settings.decoupled {
        ConcurrencyModel::Decoupled
    } else {
        ConcurrencyModel::Inline
    };
    let mut listener = ListenerConfig::new(ports, transport)
        .with_ipv6(settings.ipv6)
        .with_verbose(settings.verbose)
        .with_model(model)
        .with_max_frame_size(settings.max_frame_size)
        .with_drop_unknown_types(settings.drop_unknown_types)
        .with_stop(stop);
    if let Some(registry) = registry {
        listener = listener.with_registry(registry);
    }
    if let Some(path) = &settings.record_path {
        listener = listener.record_to(path, settings.append);
    }
    listener
}

pub fn replay_options(config: &SkaiConfig, transport: TransportKind, stop: StopSignal) -> ReplayOptions {
    ReplayOptions {
        host: config.replay.host.clone(),
        transport,
        ipv6: config.sender.ipv6,
        camera_group: config.replay.camera_group,
        suffix_digits: config.replay.suffix_digits,
        sender: sender_config(&config.sender, stop),
        udp_fragment_size: config.sender.fragment_size,
        inter_packet_delay: Duration::from_micros(config.sender.inter_packet_delay_us),
    }
}

/// Resolve once Ctrl-C is received, then set `stop`
pub fn stop_on_ctrl_c(stop: StopSignal) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                stop.trigger();
            }
            Err(e) => tracing::warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::default_channels;
    use replay::ReplayError;

    #[test]
    fn test_registry_from_default_channels() {
        let registry = registry_from_channels(&default_channels()).unwrap();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.type_name(3), Some("FEETPOS"));
        assert_eq!(registry.type_for_port(7020), Some(5));
    }

    #[test]
    fn test_registry_rejects_duplicate_type_ids() {
        let mut channels = default_channels();
        channels.push(ChannelSettings::new("AGAIN", 1, 7100));
        assert!(registry_from_channels(&channels).is_err());
    }

    #[test]
    fn test_sender_config_from_settings() {
        let settings = SenderSettings {
            initial_retry_limit: Some(5),
            retry_backoff_secs: 0.25,
            blocking_connect: false,
            ..SenderSettings::default()
        };
        let config = sender_config(&settings, StopSignal::new());
        assert_eq!(config.initial.max_retries, Some(5));
        assert_eq!(config.reconnect.max_retries, Some(3));
        assert_eq!(config.reconnect.backoff, Duration::from_millis(250));
        assert!(!config.blocking_connect);
    }

    #[test]
    fn test_ports_for_camera_group() {
        let ports = ports_for_camera_group(&[6940, 7020], 3, 2).unwrap();
        assert_eq!(ports, vec![6903, 7003]);
        assert!(ports_for_camera_group(&[6940], 100, 2).is_err());
    }

    #[test]
    fn test_ports_for_camera_group_rejects_collisions() {
        let err = ports_for_camera_group(&[6940, 6941], 3, 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReplayError>(),
            Some(ReplayError::RemapCollision {
                target: 6903,
                first: 6940,
                second: 6941
            })
        ));
    }

    #[test]
    fn test_listener_config_from_settings() {
        let mut config = SkaiConfig::default();
        config.listener.decoupled = true;
        config.listener.record_path = Some("/tmp/session.skaibin".into());

        let listener = listener_config(
            &config,
            config.listener_ports(),
            TransportKind::Udp,
            None,
            StopSignal::new(),
        );
        assert_eq!(listener.model, ConcurrencyModel::Decoupled);
        assert!(listener.drop_unknown_types);
        assert_eq!(listener.ports, vec![6940, 6941, 6969, 7000, 7020]);
        assert!(listener.validate().is_ok());
    }

    #[test]
    fn test_replay_options_from_settings() {
        let mut config = SkaiConfig::default();
        config.replay.camera_group = Some(12);
        let options = replay_options(&config, TransportKind::Tcp, StopSignal::new());
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.camera_group, Some(12));
        assert_eq!(options.udp_fragment_size, 4096);
    }
}
