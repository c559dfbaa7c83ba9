use tracing::{debug, error};

use crate::association::PeripheralAssociation;
use crate::error::{Result, TransportError};
use crate::traits::{ConnectionHandle, Endpoint, Link, LinkRole, Transport};

/// Transport for the peripheral half: every frame goes to the one upstream
/// connection on a fixed local endpoint.
pub struct PeripheralTransport<L> {
    link: L,
    endpoint: Endpoint,
    association: PeripheralAssociation,
}

impl<L: Link> PeripheralTransport<L> {
    /// Create a transport writing to `endpoint` (the local data attribute or
    /// channel) over `link`.
    pub fn new(link: L, endpoint: Endpoint) -> Self {
        Self {
            link,
            endpoint,
            association: PeripheralAssociation::new(),
        }
    }

    /// Connection-established notification.
    pub fn on_connected(&self, conn: ConnectionHandle) {
        self.association.store_connection(conn);
    }

    /// Connection-lost notification. `None` clears whatever is active.
    pub fn on_disconnected(&self, conn: Option<ConnectionHandle>) {
        self.association.clear_connection(conn);
    }

    /// Connection state.
    pub fn association(&self) -> &PeripheralAssociation {
        &self.association
    }

    /// Underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }
}

impl<L: Link> Transport for PeripheralTransport<L> {
    fn name(&self) -> &'static str {
        "peripheral"
    }

    fn role(&self) -> LinkRole {
        LinkRole::Peripheral
    }

    fn peer_capacity(&self) -> usize {
        1
    }

    fn send(&self, bytes: &[u8]) -> Result<usize> {
        let conn = self.association.current().ok_or_else(|| {
            error!("no active connection for send");
            TransportError::NoConnection
        })?;

        let max = self.link.max_payload(conn);
        if bytes.len() > max {
            error!(%conn, size = bytes.len(), max, "frame exceeds link payload limit");
            return Err(TransportError::PayloadTooLarge {
                size: bytes.len(),
                max,
            });
        }

        self.link.write(conn, self.endpoint, bytes).map_err(|err| {
            error!(%conn, error = %err, "link write failed");
            err
        })?;
        debug!(%conn, len = bytes.len(), "frame written");
        Ok(bytes.len())
    }
}
