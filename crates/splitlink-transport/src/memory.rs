use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::{ConnectionHandle, Endpoint, InboundSink, Link};

/// Default maximum write size: a 247-byte ATT MTU minus the 3-byte ATT header.
pub const DEFAULT_MEMORY_MAX_PAYLOAD: usize = 244;

struct Route {
    sink: Arc<dyn InboundSink>,
    source: Option<ConnectionHandle>,
}

/// In-process link that delivers every write straight into a remote
/// [`InboundSink`].
///
/// Stands in for the radio stack when both halves run in one process: the
/// CLI loopback demo and integration tests. Writes on a connection can be
/// made to fail on demand.
pub struct MemoryLink {
    max_payload: AtomicUsize,
    routes: RwLock<HashMap<ConnectionHandle, Route>>,
    failing: RwLock<HashSet<ConnectionHandle>>,
    writes: AtomicU64,
}

impl MemoryLink {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: AtomicUsize::new(max_payload),
            routes: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Deliver writes on `conn` to `sink`, tagged with `source` as the remote
    /// end sees it.
    pub fn route(
        &self,
        conn: ConnectionHandle,
        sink: Arc<dyn InboundSink>,
        source: Option<ConnectionHandle>,
    ) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn, Route { sink, source });
        debug!(%conn, "memory link route added");
    }

    /// Drop the route for `conn`; later writes fail.
    pub fn unroute(&self, conn: ConnectionHandle) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn);
    }

    /// Make writes on `conn` fail (or succeed again).
    pub fn set_failing(&self, conn: ConnectionHandle, failing: bool) {
        let mut set = self.failing.write().unwrap_or_else(PoisonError::into_inner);
        if failing {
            set.insert(conn);
        } else {
            set.remove(&conn);
        }
    }

    /// Simulate a renegotiated MTU.
    pub fn set_max_payload(&self, max_payload: usize) {
        self.max_payload.store(max_payload, Ordering::Relaxed);
    }

    /// Writes delivered so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Default for MemoryLink {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_MAX_PAYLOAD)
    }
}

impl Link for MemoryLink {
    fn write(&self, conn: ConnectionHandle, endpoint: Endpoint, bytes: &[u8]) -> Result<()> {
        if self
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&conn)
        {
            return Err(TransportError::Link {
                conn,
                reason: "injected failure".to_string(),
            });
        }

        let (sink, source) = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            let route = routes.get(&conn).ok_or_else(|| TransportError::Link {
                conn,
                reason: "no route".to_string(),
            })?;
            (Arc::clone(&route.sink), route.source)
        };

        trace!(%conn, %endpoint, len = bytes.len(), "memory link write");
        sink.on_transport_bytes(source, bytes);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn max_payload(&self, _conn: ConnectionHandle) -> usize {
        self.max_payload.load(Ordering::Relaxed)
    }
}
