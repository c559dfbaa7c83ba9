/// Errors that can occur while encoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The payload length cannot be represented in the 4-byte length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Reasons an inbound byte sequence is not a valid frame.
///
/// None of these are fatal: the receiver logs and drops the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes than the fixed header.
    #[error("frame too short ({len} bytes, header is {header})")]
    TooShort { len: usize, header: usize },

    /// The declared payload length disagrees with the bytes received.
    #[error("frame length mismatch (declared {declared} payload bytes, got {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The header declares a zero-length payload.
    #[error("frame has an empty payload")]
    EmptyPayload,
}

pub type Result<T> = std::result::Result<T, FrameError>;
