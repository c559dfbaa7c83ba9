//! Logical multi-channel message bus over a single split-device link.
//!
//! Producers send payloads on named devices; each device is bound to one
//! channel identifier. Payloads are framed, queued, and drained into the
//! transport by a worker. Inbound bytes are queued by the link and routed
//! to the consumer callback of the channel named in the frame header.
//!
//! ```no_run
//! use std::time::Duration;
//! use splitlink_bus::{Bus, BusConfig, DeviceHandle};
//! use splitlink_transport::{Endpoint, MemoryLink, PeripheralTransport};
//!
//! let config = BusConfig::default().with_channel(1, "keys");
//! let transport = PeripheralTransport::new(MemoryLink::default(), Endpoint(1));
//! let bus = Bus::start(&config, transport)?;
//! bus.send(&DeviceHandle::from("keys"), b"hello", Duration::ZERO)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod queue;
pub mod receive;
pub mod registry;
pub mod send;
pub mod work;

pub use bus::{Bus, BusStats, ManualWorkers};
pub use config::{
    BusConfig, ChannelConfig, Role, DEFAULT_FAN_OUT_PACE_MS, DEFAULT_MAX_PEERS,
    DEFAULT_RX_QUEUE_SIZE, DEFAULT_TX_QUEUE_SIZE,
};
pub use error::{BusError, ConfigError, ReceiveError, RegistryError, Result, SendError};
pub use queue::BoundedQueue;
pub use receive::{InboundFrame, ReceivePipeline, ReceiveStatsSnapshot};
pub use registry::{Channel, ChannelRef, ChannelRegistry, Delivery, DeviceHandle, ReceiveCallback};
pub use send::{FailureHook, OutboundFrame, SendFailure, SendPipeline, SendStatsSnapshot};
#[cfg(feature = "async")]
pub use work::TokioWorker;
pub use work::{Job, ManualScheduler, Scheduler, ThreadWorker, WorkKind, MAX_DELAY};
