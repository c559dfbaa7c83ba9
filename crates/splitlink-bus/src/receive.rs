use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use splitlink_frame::{decode_frame, HEADER_SIZE};
use splitlink_transport::ConnectionHandle;
use tracing::{debug, error, warn};

use crate::error::ReceiveError;
use crate::queue::BoundedQueue;
use crate::registry::{ChannelRegistry, Delivery};

/// Raw bytes from the link waiting for the dispatch worker.
#[derive(Debug)]
pub struct InboundFrame {
    pub source: Option<ConnectionHandle>,
    pub bytes: Bytes,
}

#[derive(Debug, Default)]
struct ReceiveStats {
    received: AtomicU64,
    dispatched: AtomicU64,
    queue_full: AtomicU64,
    malformed: AtomicU64,
    unroutable: AtomicU64,
    no_callback: AtomicU64,
    callback_panics: AtomicU64,
}

/// Point-in-time receive counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiveStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub queue_full: u64,
    pub malformed: u64,
    pub unroutable: u64,
    pub no_callback: u64,
    pub callback_panics: u64,
}

/// Inbound half of the bus: the link pushes raw bytes from whatever context
/// it runs in, and one dispatch worker routes them to consumers.
pub struct ReceivePipeline {
    registry: Arc<ChannelRegistry>,
    queue: BoundedQueue<InboundFrame>,
    stats: ReceiveStats,
}

impl ReceivePipeline {
    pub fn new(registry: Arc<ChannelRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            queue: BoundedQueue::new(capacity),
            stats: ReceiveStats::default(),
        }
    }

    /// Accept bytes from the link. Never blocks.
    ///
    /// Only the header length is checked here; full decoding happens on the
    /// dispatch worker. Scheduling the dispatch is the caller's job.
    pub fn on_transport_bytes(
        &self,
        source: Option<ConnectionHandle>,
        bytes: &[u8],
    ) -> Result<(), ReceiveError> {
        if bytes.len() < HEADER_SIZE {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            warn!(len = bytes.len(), "inbound data too short for a frame header");
            return Err(ReceiveError::TooShort { len: bytes.len() });
        }

        let frame = InboundFrame {
            source,
            bytes: Bytes::copy_from_slice(bytes),
        };
        if self.queue.try_push(frame).is_err() {
            self.stats.queue_full.fetch_add(1, Ordering::Relaxed);
            warn!(
                len = bytes.len(),
                capacity = self.queue.capacity(),
                "receive queue full, dropping inbound frame"
            );
            return Err(ReceiveError::QueueFull {
                capacity: self.queue.capacity(),
            });
        }

        self.stats.received.fetch_add(1, Ordering::Relaxed);
        debug!(len = bytes.len(), "inbound frame queued");
        Ok(())
    }

    /// Decode and deliver every queued frame, oldest first. Returns the
    /// number of frames processed.
    ///
    /// Callbacks run inline, so one slow consumer holds up the rest. A
    /// panicking callback costs only its own frame.
    pub fn dispatch(&self) -> usize {
        let mut processed = 0usize;
        while let Some(inbound) = self.queue.try_pop() {
            processed += 1;
            self.dispatch_one(inbound);
        }
        processed
    }

    /// Frames waiting for dispatch.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn stats(&self) -> ReceiveStatsSnapshot {
        ReceiveStatsSnapshot {
            received: self.stats.received.load(Ordering::Relaxed),
            dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            queue_full: self.stats.queue_full.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
            unroutable: self.stats.unroutable.load(Ordering::Relaxed),
            no_callback: self.stats.no_callback.load(Ordering::Relaxed),
            callback_panics: self.stats.callback_panics.load(Ordering::Relaxed),
        }
    }

    fn dispatch_one(&self, inbound: InboundFrame) {
        let frame = match decode_frame(inbound.bytes) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "dropping malformed frame");
                return;
            }
        };

        let Some(channel) = self.registry.lookup(frame.channel_id) else {
            self.stats.unroutable.fetch_add(1, Ordering::Relaxed);
            warn!(channel_id = frame.channel_id, "no channel registered for frame");
            return;
        };

        let Some(callback) = channel.receive_callback() else {
            self.stats.no_callback.fetch_add(1, Ordering::Relaxed);
            warn!(channel_id = frame.channel_id, device = %channel.device(), "no receive callback, dropping frame");
            return;
        };

        debug!(channel_id = frame.channel_id, len = frame.payload.len(), "dispatching frame");
        let delivery = Delivery {
            channel_id: frame.channel_id,
            device: channel.device(),
            source: inbound.source,
            payload: &frame.payload,
        };
        if panic::catch_unwind(AssertUnwindSafe(|| callback(&delivery))).is_err() {
            self.stats.callback_panics.fetch_add(1, Ordering::Relaxed);
            error!(channel_id = frame.channel_id, device = %channel.device(), "receive callback panicked");
            return;
        }
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
    }
}
