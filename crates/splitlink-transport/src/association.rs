//! Which physical connections are currently usable, per role.
//!
//! Each table has a single writer: the connection-event path of the radio
//! stack. Sends only read. The locks make that safe when events and sends run
//! on different threads.

use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::traits::{ConnectionHandle, Endpoint};

/// Peripheral role: at most one upstream connection matters.
#[derive(Debug, Default)]
pub struct PeripheralAssociation {
    current: RwLock<Option<ConnectionHandle>>,
}

impl PeripheralAssociation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `conn` the active upstream connection.
    pub fn store_connection(&self, conn: ConnectionHandle) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.replace(conn) {
            if previous != conn {
                debug!(%previous, %conn, "replacing active connection");
            }
        }
        debug!(%conn, "connection stored");
    }

    /// Forget the active connection.
    ///
    /// With `Some(conn)` only a matching connection is cleared; with `None`
    /// the slot is cleared unconditionally. Returns whether anything changed.
    pub fn clear_connection(&self, conn: Option<ConnectionHandle>) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match (conn, *current) {
            (_, None) => false,
            (Some(conn), Some(active)) if conn != active => {
                debug!(%conn, %active, "ignoring clear for inactive connection");
                false
            }
            (_, Some(active)) => {
                *current = None;
                debug!(conn = %active, "connection cleared");
                true
            }
        }
    }

    /// The active connection, if any.
    pub fn current(&self) -> Option<ConnectionHandle> {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One connected peer as seen by the central role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// Index of the slot holding this peer.
    pub slot: usize,
    /// Connection to the peer.
    pub conn: ConnectionHandle,
    /// Data endpoint, once discovery or channel setup finished.
    pub endpoint: Option<Endpoint>,
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    conn: ConnectionHandle,
    endpoint: Option<Endpoint>,
}

/// Central role: a fixed table of peer slots.
#[derive(Debug)]
pub struct CentralAssociation {
    slots: RwLock<Vec<Option<SlotState>>>,
}

impl CentralAssociation {
    /// Create a table with `max_peers` slots. The table never grows.
    pub fn new(max_peers: usize) -> Self {
        Self {
            slots: RwLock::new(vec![None; max_peers]),
        }
    }

    /// Claim a slot for a newly connected peer.
    ///
    /// A peer that is already tracked keeps its slot, with its endpoint reset
    /// so setup runs again. Otherwise the first free slot is used.
    pub fn connect(&self, conn: ConnectionHandle) -> Result<usize> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(index) = slots
            .iter()
            .position(|slot| matches!(slot, Some(state) if state.conn == conn))
        {
            debug!(%conn, slot = index, "peer already tracked, reusing slot");
            slots[index] = Some(SlotState {
                conn,
                endpoint: None,
            });
            return Ok(index);
        }

        match slots.iter().position(Option::is_none) {
            Some(index) => {
                slots[index] = Some(SlotState {
                    conn,
                    endpoint: None,
                });
                debug!(%conn, slot = index, "peer slot claimed");
                Ok(index)
            }
            None => {
                warn!(%conn, max = slots.len(), "no space to track peer connection");
                Err(TransportError::NoCapacity { max: slots.len() })
            }
        }
    }

    /// Release the slot owned by `conn` and reset its per-peer state.
    pub fn disconnect(&self, conn: ConnectionHandle) -> Option<usize> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let index = slots
            .iter()
            .position(|slot| matches!(slot, Some(state) if state.conn == conn))?;
        slots[index] = None;
        debug!(%conn, slot = index, "peer slot released");
        Some(index)
    }

    /// Record the data endpoint for a tracked peer.
    pub fn set_endpoint(&self, conn: ConnectionHandle, endpoint: Endpoint) -> Result<()> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let state = slots
            .iter_mut()
            .flatten()
            .find(|state| state.conn == conn)
            .ok_or(TransportError::NoConnection)?;
        state.endpoint = Some(endpoint);
        debug!(%conn, %endpoint, "peer endpoint ready");
        Ok(())
    }

    /// Snapshot of all occupied slots in slot order.
    pub fn sessions(&self) -> Vec<Session> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .enumerate()
            .filter_map(|(slot, state)| {
                state.map(|state| Session {
                    slot,
                    conn: state.conn,
                    endpoint: state.endpoint,
                })
            })
            .collect()
    }

    /// Number of slots in the table.
    pub fn capacity(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
