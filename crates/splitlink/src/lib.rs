//! Logical multi-channel message bus for split input devices.
//!
//! Two halves of a split device share one radio link. splitlink multiplexes
//! any number of logical channels over it: every payload travels in a frame
//! tagged with its channel identifier, and the receiving half routes it to
//! the consumer registered for that channel.
//!
//! # Crate Structure
//!
//! - [`frame`]: the wire frame codec
//! - [`transport`]: the transport seam, role association, and the in-memory link
//! - [`bus`]: channel registry, send/receive pipelines, and workers

/// Re-export frame types.
pub mod frame {
    pub use splitlink_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use splitlink_transport::*;
}

/// Re-export bus types.
pub mod bus {
    pub use splitlink_bus::*;
}

pub use splitlink_bus::{Bus, BusConfig, DeviceHandle};
