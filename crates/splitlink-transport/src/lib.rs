//! Transport abstraction for the split link bus.
//!
//! The bus core never talks to a radio directly. It hands encoded frames to a
//! [`Transport`], and the transport decides which physical connection(s) the
//! bytes go to:
//! - [`PeripheralTransport`]: one upstream connection at a time
//! - [`CentralTransport`]: fan-out to every connected peer slot
//!
//! Both sit on a [`Link`], the narrow boundary to the external radio stack
//! (GATT notify/write-without-response, L2CAP streams, or the in-process
//! [`MemoryLink`]).

pub mod association;
pub mod central;
pub mod error;
pub mod memory;
pub mod peripheral;
pub mod traits;

pub use association::{CentralAssociation, PeripheralAssociation, Session};
pub use central::{
    CentralConfig, CentralTransport, PeerFailureHook, DEFAULT_FAN_OUT_PACE, DEFAULT_MAX_PEERS,
};
pub use error::{Result, TransportError};
pub use memory::{MemoryLink, DEFAULT_MEMORY_MAX_PAYLOAD};
pub use peripheral::PeripheralTransport;
pub use traits::{ConnectionHandle, Endpoint, InboundSink, Link, LinkRole, Transport};
