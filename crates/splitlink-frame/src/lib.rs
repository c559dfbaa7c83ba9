//! Channel-tagged framing for the split link message bus.
//!
//! Every message crossing the physical link is framed with:
//! - A 4-byte little-endian channel ID for multiplexing
//! - A 4-byte little-endian payload length
//!
//! One transport write carries exactly one frame, so there is no stream
//! resynchronization and no magic number. Frames larger than the link's
//! negotiated maximum are rejected by the transport, never split.

pub mod codec;
pub mod error;

pub use codec::{decode_frame, encode, encode_frame, payload_capacity, Frame, HEADER_SIZE};
pub use error::{DecodeError, FrameError, Result};
