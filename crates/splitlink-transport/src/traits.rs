use std::fmt;

use crate::error::Result;

/// Identifies one physical connection as seen by the local radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u16);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Where frame bytes go on a connection.
///
/// For GATT this is the data characteristic's value handle, for L2CAP the
/// connection-oriented channel id. Opaque to everything but the [`Link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(pub u16);

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Which half of the split device a transport serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    /// One upstream connection at a time.
    Peripheral,
    /// Fan-out to a fixed table of peer slots.
    Central,
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkRole::Peripheral => f.write_str("peripheral"),
            LinkRole::Central => f.write_str("central"),
        }
    }
}

/// The capability contract every concrete transport satisfies.
///
/// The bus hands one fully encoded frame per call. Implementations check the
/// frame against the current negotiated maximum and reject it whole, they
/// never truncate or split.
pub trait Transport: Send + Sync + 'static {
    /// Short name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Role this transport plays on the link.
    fn role(&self) -> LinkRole;

    /// Peers one frame can reach: 1 for a peripheral, the slot table size
    /// for a central.
    fn peer_capacity(&self) -> usize;

    /// Send one encoded frame. Returns the number of bytes handed to the link.
    fn send(&self, bytes: &[u8]) -> Result<usize>;
}

/// Boundary to the external radio stack.
pub trait Link: Send + Sync + 'static {
    /// Write one frame to `endpoint` on `conn`.
    fn write(&self, conn: ConnectionHandle, endpoint: Endpoint, bytes: &[u8]) -> Result<()>;

    /// Largest single write currently allowed on `conn`.
    ///
    /// May grow after MTU negotiation, so callers ask on every send.
    fn max_payload(&self, conn: ConnectionHandle) -> usize;
}

/// Receives raw inbound bytes from a link.
///
/// Links may call this from restricted contexts; implementations must not
/// block.
pub trait InboundSink: Send + Sync {
    /// Bytes arrived from `source` (`None` when the role has a single peer).
    fn on_transport_bytes(&self, source: Option<ConnectionHandle>, bytes: &[u8]);
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn role(&self) -> LinkRole {
        (**self).role()
    }

    fn peer_capacity(&self) -> usize {
        (**self).peer_capacity()
    }

    fn send(&self, bytes: &[u8]) -> Result<usize> {
        (**self).send(bytes)
    }
}

impl<L: Link + ?Sized> Link for std::sync::Arc<L> {
    fn write(&self, conn: ConnectionHandle, endpoint: Endpoint, bytes: &[u8]) -> Result<()> {
        (**self).write(conn, endpoint, bytes)
    }

    fn max_payload(&self, conn: ConnectionHandle) -> usize {
        (**self).max_payload(conn)
    }
}
