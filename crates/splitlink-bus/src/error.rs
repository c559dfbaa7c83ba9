use std::path::PathBuf;

/// Channel table errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two channels declare the same identifier.
    #[error("duplicate channel id {0}")]
    DuplicateChannel(u32),

    /// Two channels are bound to the same device.
    #[error("duplicate device {0:?}")]
    DuplicateDevice(String),

    /// No channel is bound to the device.
    #[error("unknown device {0:?}")]
    UnknownDevice(String),
}

/// Startup configuration errors. The only errors allowed to stop the bus.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The channel table is inconsistent.
    #[error("invalid channel table: {0}")]
    Registry(#[from] RegistryError),

    /// A queue was configured with zero capacity.
    #[error("{queue} queue size must be greater than zero")]
    InvalidQueueSize { queue: &'static str },

    /// The central role was configured without peer slots.
    #[error("max_peers must be greater than zero")]
    InvalidPeerCount,

    /// The transport plays a different role than the config declares.
    #[error("config role {config} does not match the {transport} transport")]
    RoleMismatch {
        config: crate::config::Role,
        transport: splitlink_transport::LinkRole,
    },

    /// The central transport has a different slot count than `max_peers`.
    #[error("max_peers is {config} but the transport has {transport} peer slots")]
    PeerCountMismatch { config: usize, transport: usize },

    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Load {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config is not valid JSON for this schema.
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors starting a bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A worker thread or task could not be started.
    #[error("failed to start {worker} worker: {source}")]
    Spawn {
        worker: &'static str,
        source: std::io::Error,
    },
}

/// Errors returned to a producer by a send request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// No channel is bound to the device.
    #[error("unknown device {0:?}")]
    UnknownDevice(String),

    /// The outbound queue is saturated; the message was dropped.
    #[error("send queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The frame buffer could not be allocated.
    #[error("failed to allocate {size}-byte frame buffer")]
    AllocationFailure { size: usize },

    /// The payload cannot be framed.
    #[error(transparent)]
    Frame(#[from] splitlink_frame::FrameError),
}

/// Errors reported to the link when inbound bytes are refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiveError {
    /// Fewer bytes than a frame header.
    #[error("inbound data too short ({len} bytes)")]
    TooShort { len: usize },

    /// The inbound queue is saturated; the bytes were dropped.
    #[error("receive queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
}

pub type Result<T> = std::result::Result<T, BusError>;
