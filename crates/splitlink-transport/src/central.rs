use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::association::{CentralAssociation, Session};
use crate::error::{Result, TransportError};
use crate::traits::{ConnectionHandle, Endpoint, Link, LinkRole, Transport};

/// Default number of peer slots.
pub const DEFAULT_MAX_PEERS: usize = 4;

/// Default gap between successive writes of one fan-out.
pub const DEFAULT_FAN_OUT_PACE: Duration = Duration::from_millis(5);

/// Central role settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentralConfig {
    /// Size of the fixed peer slot table.
    pub max_peers: usize,
    /// Pause between writes to successive peers. The radio serializes sends,
    /// so back-to-back writes to several peers can overrun it.
    pub pace: Duration,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            max_peers: DEFAULT_MAX_PEERS,
            pace: DEFAULT_FAN_OUT_PACE,
        }
    }
}

/// Called for each peer a fan-out missed while at least one other peer got
/// the frame. Such a send still succeeds, so the bus never sees these.
pub type PeerFailureHook = Arc<dyn Fn(ConnectionHandle, &TransportError) + Send + Sync>;

/// Transport for the central half: every frame fans out to all connected
/// peers.
pub struct CentralTransport<L> {
    link: L,
    config: CentralConfig,
    association: CentralAssociation,
    peer_failure_hook: RwLock<Option<PeerFailureHook>>,
}

impl<L: Link> CentralTransport<L> {
    pub fn new(link: L, config: CentralConfig) -> Self {
        Self {
            link,
            association: CentralAssociation::new(config.max_peers),
            config,
            peer_failure_hook: RwLock::new(None),
        }
    }

    /// Install the per-peer failure hook. Replaces any earlier hook.
    pub fn set_peer_failure_hook<F>(&self, hook: F)
    where
        F: Fn(ConnectionHandle, &TransportError) + Send + Sync + 'static,
    {
        *self
            .peer_failure_hook
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Connection-established notification. Fails with `NoCapacity` when
    /// every slot is taken.
    pub fn on_connected(&self, conn: ConnectionHandle) -> Result<usize> {
        self.association.connect(conn)
    }

    /// The peer's data endpoint was discovered (GATT) or opened (L2CAP).
    pub fn on_endpoint_ready(&self, conn: ConnectionHandle, endpoint: Endpoint) -> Result<()> {
        self.association.set_endpoint(conn, endpoint)
    }

    /// Connection-lost notification.
    pub fn on_disconnected(&self, conn: ConnectionHandle) {
        self.association.disconnect(conn);
    }

    /// Peer slot table.
    pub fn association(&self) -> &CentralAssociation {
        &self.association
    }

    /// Underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn config(&self) -> &CentralConfig {
        &self.config
    }

    fn send_to(&self, session: &Session, bytes: &[u8]) -> Result<()> {
        let endpoint = session
            .endpoint
            .ok_or(TransportError::NotReady(session.conn))?;

        let max = self.link.max_payload(session.conn);
        if bytes.len() > max {
            return Err(TransportError::PayloadTooLarge {
                size: bytes.len(),
                max,
            });
        }

        self.link.write(session.conn, endpoint, bytes)
    }
}

impl<L: Link> Transport for CentralTransport<L> {
    fn name(&self) -> &'static str {
        "central"
    }

    fn role(&self) -> LinkRole {
        LinkRole::Central
    }

    fn peer_capacity(&self) -> usize {
        self.association.capacity()
    }

    fn send(&self, bytes: &[u8]) -> Result<usize> {
        let sessions = self.association.sessions();
        if sessions.is_empty() {
            error!("no connected peers for send");
            return Err(TransportError::NoConnection);
        }

        let mut failed = Vec::new();
        for (i, session) in sessions.iter().enumerate() {
            if i > 0 && !self.config.pace.is_zero() {
                std::thread::sleep(self.config.pace);
            }

            match self.send_to(session, bytes) {
                Ok(()) => {
                    debug!(conn = %session.conn, slot = session.slot, len = bytes.len(), "frame written");
                }
                Err(err) => {
                    warn!(conn = %session.conn, slot = session.slot, error = %err, "peer send failed");
                    failed.push((session.conn, err));
                }
            }
        }

        if failed.len() == sessions.len() {
            error!(peers = failed.len(), "frame reached no peer");
            return Err(TransportError::FanOut {
                attempted: sessions.len(),
                failed: failed.len(),
            });
        }

        if !failed.is_empty() {
            let hook = self
                .peer_failure_hook
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(hook) = hook {
                for (conn, err) in &failed {
                    hook(*conn, err);
                }
            }
        }
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingLink {
        failing: HashSet<ConnectionHandle>,
        attempts: Mutex<Vec<ConnectionHandle>>,
        delivered: Mutex<Vec<(ConnectionHandle, Vec<u8>)>>,
    }

    impl Link for RecordingLink {
        fn write(&self, conn: ConnectionHandle, _endpoint: Endpoint, bytes: &[u8]) -> Result<()> {
            self.attempts.lock().unwrap().push(conn);
            if self.failing.contains(&conn) {
                return Err(TransportError::Link {
                    conn,
                    reason: "radio busy".to_string(),
                });
            }
            self.delivered.lock().unwrap().push((conn, bytes.to_vec()));
            Ok(())
        }

        fn max_payload(&self, _conn: ConnectionHandle) -> usize {
            64
        }
    }

    fn no_pace(max_peers: usize) -> CentralConfig {
        CentralConfig {
            max_peers,
            pace: Duration::ZERO,
        }
    }

    fn connect_ready(transport: &CentralTransport<RecordingLink>, conns: &[u16]) {
        for &raw in conns {
            let conn = ConnectionHandle(raw);
            transport.on_connected(conn).unwrap();
            transport.on_endpoint_ready(conn, Endpoint(0x30)).unwrap();
        }
    }

    #[test]
    fn fan_out_survives_one_failing_peer() {
        let link = RecordingLink {
            failing: HashSet::from([ConnectionHandle(2)]),
            ..RecordingLink::default()
        };
        let transport = CentralTransport::new(link, no_pace(3));
        connect_ready(&transport, &[1, 2, 3]);

        assert_eq!(transport.send(b"payload").unwrap(), 7);

        let attempts = transport.link().attempts.lock().unwrap().clone();
        assert_eq!(
            attempts,
            vec![ConnectionHandle(1), ConnectionHandle(2), ConnectionHandle(3)]
        );
        let delivered: Vec<_> = transport
            .link()
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(conn, _)| *conn)
            .collect();
        assert_eq!(delivered, vec![ConnectionHandle(1), ConnectionHandle(3)]);
    }

    #[test]
    fn partial_fan_out_reports_each_missed_peer() {
        let link = RecordingLink {
            failing: HashSet::from([ConnectionHandle(2)]),
            ..RecordingLink::default()
        };
        let transport = CentralTransport::new(link, no_pace(3));
        connect_ready(&transport, &[1, 2, 3]);

        let missed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&missed);
        transport.set_peer_failure_hook(move |conn, err| {
            sink.lock().unwrap().push((conn, err.clone()));
        });

        assert_eq!(transport.send(b"payload").unwrap(), 7);
        let missed = missed.lock().unwrap();
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].0, ConnectionHandle(2));
        assert!(matches!(missed[0].1, TransportError::Link { .. }));
    }

    #[test]
    fn total_fan_out_failure_skips_peer_hook() {
        let link = RecordingLink {
            failing: HashSet::from([ConnectionHandle(1)]),
            ..RecordingLink::default()
        };
        let transport = CentralTransport::new(link, no_pace(1));
        connect_ready(&transport, &[1]);
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        transport.set_peer_failure_hook(move |_, _| *counter.lock().unwrap() += 1);

        assert!(transport.send(b"x").is_err());
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn reports_role_and_slot_capacity() {
        let transport = CentralTransport::new(RecordingLink::default(), no_pace(3));
        assert_eq!(transport.role(), LinkRole::Central);
        assert_eq!(transport.peer_capacity(), 3);
    }

    #[test]
    fn fan_out_with_every_peer_failing_reports_error() {
        let link = RecordingLink {
            failing: HashSet::from([ConnectionHandle(1), ConnectionHandle(2)]),
            ..RecordingLink::default()
        };
        let transport = CentralTransport::new(link, no_pace(2));
        connect_ready(&transport, &[1, 2]);

        assert_eq!(
            transport.send(b"x"),
            Err(TransportError::FanOut {
                attempted: 2,
                failed: 2
            })
        );
    }

    #[test]
    fn send_without_peers_is_no_connection() {
        let transport = CentralTransport::new(RecordingLink::default(), no_pace(2));
        assert_eq!(transport.send(b"x"), Err(TransportError::NoConnection));
    }

    #[test]
    fn peer_without_endpoint_is_skipped() {
        let transport = CentralTransport::new(RecordingLink::default(), no_pace(2));
        connect_ready(&transport, &[1]);
        transport.on_connected(ConnectionHandle(2)).unwrap();

        assert_eq!(transport.send(b"x").unwrap(), 1);
        assert_eq!(
            transport.link().attempts.lock().unwrap().as_slice(),
            &[ConnectionHandle(1)]
        );
    }

    #[test]
    fn oversize_frame_is_rejected_per_peer() {
        let transport = CentralTransport::new(RecordingLink::default(), no_pace(1));
        connect_ready(&transport, &[1]);

        assert!(matches!(
            transport.send(&[0u8; 65]),
            Err(TransportError::FanOut { .. })
        ));
        assert!(transport.link().attempts.lock().unwrap().is_empty());
    }

    #[test]
    fn disconnected_peer_no_longer_receives() {
        let transport = CentralTransport::new(RecordingLink::default(), no_pace(2));
        connect_ready(&transport, &[1, 2]);
        transport.on_disconnected(ConnectionHandle(1));

        transport.send(b"x").unwrap();
        assert_eq!(
            transport.link().attempts.lock().unwrap().as_slice(),
            &[ConnectionHandle(2)]
        );
    }

    #[test]
    fn full_table_rejects_new_peer() {
        let transport = CentralTransport::new(RecordingLink::default(), no_pace(1));
        connect_ready(&transport, &[1]);
        assert_eq!(
            transport.on_connected(ConnectionHandle(2)),
            Err(TransportError::NoCapacity { max: 1 })
        );
    }
}
