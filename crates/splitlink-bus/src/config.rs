use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use splitlink_transport::{CentralConfig, LinkRole};

use crate::error::ConfigError;
use crate::registry::ChannelRegistry;

/// Default outbound queue capacity.
pub const DEFAULT_TX_QUEUE_SIZE: usize = 16;
/// Default inbound queue capacity.
pub const DEFAULT_RX_QUEUE_SIZE: usize = 16;
/// Default number of central peer slots.
pub const DEFAULT_MAX_PEERS: usize = splitlink_transport::DEFAULT_MAX_PEERS;
/// Default fan-out pacing in milliseconds.
pub const DEFAULT_FAN_OUT_PACE_MS: u64 = 5;

/// Which half of the split device this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Peripheral,
    Central,
}

impl Role {
    /// Transport role this bus role runs on.
    pub fn link_role(self) -> LinkRole {
        match self {
            Role::Peripheral => LinkRole::Peripheral,
            Role::Central => LinkRole::Central,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.link_role().fmt(f)
    }
}

/// One declared logical channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub channel_id: u32,
    pub device: String,
}

impl ChannelConfig {
    pub fn new(channel_id: u32, device: impl Into<String>) -> Self {
        Self {
            channel_id,
            device: device.into(),
        }
    }
}

/// Bus settings loaded at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    pub role: Role,
    /// Outbound queue capacity (frames).
    pub tx_queue_size: usize,
    /// Inbound queue capacity (frames).
    pub rx_queue_size: usize,
    /// Central role: peer slot count.
    pub max_peers: usize,
    /// Central role: pause between writes to successive peers.
    pub fan_out_pace_ms: u64,
    /// Declared channels, in registration order.
    pub channels: Vec<ChannelConfig>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            tx_queue_size: DEFAULT_TX_QUEUE_SIZE,
            rx_queue_size: DEFAULT_RX_QUEUE_SIZE,
            max_peers: DEFAULT_MAX_PEERS,
            fan_out_pace_ms: DEFAULT_FAN_OUT_PACE_MS,
            channels: Vec::new(),
        }
    }
}

impl BusConfig {
    /// Parse a JSON config and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file and validate it.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Add a channel declaration.
    pub fn with_channel(mut self, channel_id: u32, device: impl Into<String>) -> Self {
        self.channels.push(ChannelConfig::new(channel_id, device));
        self
    }

    /// Check sizes and the channel table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tx_queue_size == 0 {
            return Err(ConfigError::InvalidQueueSize { queue: "tx" });
        }
        if self.rx_queue_size == 0 {
            return Err(ConfigError::InvalidQueueSize { queue: "rx" });
        }
        if self.role == Role::Central && self.max_peers == 0 {
            return Err(ConfigError::InvalidPeerCount);
        }
        self.build_registry().map(|_| ())
    }

    /// Check that a transport matches the configured role and, for a
    /// central, the configured slot count.
    pub fn check_transport(&self, role: LinkRole, peer_capacity: usize) -> Result<(), ConfigError> {
        if self.role.link_role() != role {
            return Err(ConfigError::RoleMismatch {
                config: self.role,
                transport: role,
            });
        }
        if self.role == Role::Central && self.max_peers != peer_capacity {
            return Err(ConfigError::PeerCountMismatch {
                config: self.max_peers,
                transport: peer_capacity,
            });
        }
        Ok(())
    }

    /// Register every declared channel.
    pub fn build_registry(&self) -> Result<ChannelRegistry, ConfigError> {
        Ok(ChannelRegistry::from_config(&self.channels)?)
    }

    /// Settings for a central transport.
    pub fn central_config(&self) -> CentralConfig {
        CentralConfig {
            max_peers: self.max_peers,
            pace: Duration::from_millis(self.fan_out_pace_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    #[test]
    fn defaults_fill_missing_fields() {
        let config =
            BusConfig::from_json_str(r#"{"channels":[{"channel_id":1,"device":"asdc0"}]}"#)
                .unwrap();
        assert_eq!(config.role, Role::Peripheral);
        assert_eq!(config.tx_queue_size, DEFAULT_TX_QUEUE_SIZE);
        assert_eq!(config.rx_queue_size, DEFAULT_RX_QUEUE_SIZE);
        assert_eq!(config.channels, vec![ChannelConfig::new(1, "asdc0")]);
    }

    #[test]
    fn central_config_parses() {
        let config = BusConfig::from_json_str(
            r#"{"role":"central","max_peers":2,"fan_out_pace_ms":0,"channels":[]}"#,
        )
        .unwrap();
        assert_eq!(config.role, Role::Central);
        let central = config.central_config();
        assert_eq!(central.max_peers, 2);
        assert!(central.pace.is_zero());
    }

    #[test]
    fn duplicate_channel_is_config_error() {
        let result = BusConfig::from_json_str(
            r#"{"channels":[{"channel_id":1,"device":"a"},{"channel_id":1,"device":"b"}]}"#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::Registry(RegistryError::DuplicateChannel(1)))
        ));
    }

    #[test]
    fn zero_queue_is_rejected() {
        let config = BusConfig {
            rx_queue_size: 0,
            ..BusConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidQueueSize { queue: "rx" })
        ));
    }

    #[test]
    fn central_without_peers_is_rejected() {
        let config = BusConfig {
            role: Role::Central,
            max_peers: 0,
            ..BusConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPeerCount)
        ));
    }

    #[test]
    fn transport_role_must_match() {
        let config = BusConfig {
            role: Role::Central,
            max_peers: 2,
            ..BusConfig::default()
        };
        assert!(config.check_transport(LinkRole::Central, 2).is_ok());
        assert!(matches!(
            config.check_transport(LinkRole::Peripheral, 1),
            Err(ConfigError::RoleMismatch {
                config: Role::Central,
                transport: LinkRole::Peripheral
            })
        ));
        assert!(matches!(
            config.check_transport(LinkRole::Central, 4),
            Err(ConfigError::PeerCountMismatch {
                config: 2,
                transport: 4
            })
        ));
    }

    #[test]
    fn peripheral_ignores_peer_count() {
        let config = BusConfig::default();
        assert!(config.check_transport(LinkRole::Peripheral, 1).is_ok());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            BusConfig::from_json_str(r#"{"tx_queue":4}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn missing_file_is_load_error() {
        let path = std::env::temp_dir().join(format!(
            "splitlink-missing-{}.json",
            std::process::id()
        ));
        assert!(matches!(
            BusConfig::from_path(&path),
            Err(ConfigError::Load { .. })
        ));
    }

    #[test]
    fn from_path_reads_file() {
        let path = std::env::temp_dir().join(format!(
            "splitlink-config-{}-{}.json",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, r#"{"channels":[{"channel_id":7,"device":"d7"}]}"#).unwrap();

        let config = BusConfig::from_path(&path).unwrap();
        assert_eq!(config.build_registry().unwrap().len(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
