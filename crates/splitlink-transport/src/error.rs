use crate::traits::ConnectionHandle;

/// Errors that can occur in transport and association operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No usable connection to send on.
    #[error("no active connection")]
    NoConnection,

    /// Every peer slot is occupied.
    #[error("no free peer slot (max {max})")]
    NoCapacity { max: usize },

    /// The frame exceeds the link's current negotiated maximum payload.
    #[error("frame too large for link ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The peer is connected but its data endpoint is not set up yet.
    #[error("endpoint not ready on {0}")]
    NotReady(ConnectionHandle),

    /// The radio stack rejected the write.
    #[error("link write failed on {conn}: {reason}")]
    Link {
        conn: ConnectionHandle,
        reason: String,
    },

    /// A fan-out send reached no peer. Sends that reach at least one peer
    /// succeed; the missed peers go to the central's `PeerFailureHook`.
    #[error("fan-out failed on all {failed} of {attempted} peers")]
    FanOut { attempted: usize, failed: usize },
}

pub type Result<T> = std::result::Result<T, TransportError>;
