use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use serde::Serialize;
use splitlink_frame::{encode_frame, HEADER_SIZE};
use splitlink_transport::{Transport, TransportError};
use tracing::{debug, error, warn};

use crate::error::SendError;
use crate::queue::BoundedQueue;
use crate::registry::{ChannelRegistry, DeviceHandle};

/// An encoded frame waiting for the drain worker.
#[derive(Debug)]
pub struct OutboundFrame {
    pub channel_id: u32,
    pub device: DeviceHandle,
    pub bytes: Bytes,
}

/// A frame the transport refused. It has already been dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub channel_id: u32,
    pub device: DeviceHandle,
    pub error: TransportError,
}

/// Side channel for transport failures discovered during a drain.
pub type FailureHook = Arc<dyn Fn(&SendFailure) + Send + Sync>;

#[derive(Debug, Default)]
struct SendStats {
    enqueued: AtomicU64,
    sent: AtomicU64,
    queue_full: AtomicU64,
    transport_failures: AtomicU64,
}

/// Point-in-time send counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SendStatsSnapshot {
    pub enqueued: u64,
    pub sent: u64,
    pub queue_full: u64,
    pub transport_failures: u64,
}

/// Outbound half of the bus: producers enqueue, one drain worker empties
/// the queue into the transport.
pub struct SendPipeline {
    registry: Arc<ChannelRegistry>,
    queue: BoundedQueue<OutboundFrame>,
    stats: SendStats,
    failure_hook: RwLock<Option<FailureHook>>,
}

impl SendPipeline {
    pub fn new(registry: Arc<ChannelRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            queue: BoundedQueue::new(capacity),
            stats: SendStats::default(),
            failure_hook: RwLock::new(None),
        }
    }

    /// Frame `payload` for the channel bound to `device` and queue it.
    ///
    /// Never blocks. Returns the payload length on success. Scheduling the
    /// drain is the caller's job.
    pub fn enqueue(&self, device: &DeviceHandle, payload: &[u8]) -> Result<usize, SendError> {
        let channel = self
            .registry
            .lookup_device(device)
            .ok_or_else(|| SendError::UnknownDevice(device.name().to_string()))?;

        let size = HEADER_SIZE.saturating_add(payload.len());
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).map_err(|_| {
            error!(channel_id = channel.id(), size, "failed to allocate frame buffer");
            SendError::AllocationFailure { size }
        })?;
        encode_frame(channel.id(), payload, &mut buf)?;

        let frame = OutboundFrame {
            channel_id: channel.id(),
            device: device.clone(),
            bytes: Bytes::from(buf),
        };
        if let Err(rejected) = self.queue.try_push(frame) {
            self.stats.queue_full.fetch_add(1, Ordering::Relaxed);
            warn!(
                channel_id = rejected.channel_id,
                capacity = self.queue.capacity(),
                "send queue full, dropping message"
            );
            return Err(SendError::QueueFull {
                capacity: self.queue.capacity(),
            });
        }

        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        debug!(channel_id = channel.id(), len = payload.len(), "message queued");
        Ok(payload.len())
    }

    /// Hand every queued frame to `transport`, oldest first, until the queue
    /// is empty. A refused frame is dropped and reported; later frames are
    /// still sent. Returns the number of frames processed.
    pub fn drain<T: Transport + ?Sized>(&self, transport: &T) -> usize {
        let mut processed = 0usize;
        while let Some(frame) = self.queue.try_pop() {
            processed += 1;
            debug!(
                channel_id = frame.channel_id,
                len = frame.bytes.len(),
                transport = transport.name(),
                "sending frame"
            );
            match transport.send(&frame.bytes) {
                Ok(_) => {
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.stats.transport_failures.fetch_add(1, Ordering::Relaxed);
                    error!(channel_id = frame.channel_id, error = %err, "dropping frame after transport failure");
                    self.report(SendFailure {
                        channel_id: frame.channel_id,
                        device: frame.device,
                        error: err,
                    });
                }
            }
        }
        processed
    }

    /// Install the failure side channel. Replaces any earlier hook.
    pub fn set_failure_hook(&self, hook: Option<FailureHook>) {
        *self
            .failure_hook
            .write()
            .unwrap_or_else(PoisonError::into_inner) = hook;
    }

    /// Frames waiting for the drain.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn stats(&self) -> SendStatsSnapshot {
        SendStatsSnapshot {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            sent: self.stats.sent.load(Ordering::Relaxed),
            queue_full: self.stats.queue_full.load(Ordering::Relaxed),
            transport_failures: self.stats.transport_failures.load(Ordering::Relaxed),
        }
    }

    fn report(&self, failure: SendFailure) {
        let hook = self
            .failure_hook
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(&failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use splitlink_frame::decode_frame;

    use super::*;

    #[derive(Default)]
    struct ScriptedTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        fail_on_call: Option<usize>,
        calls: Mutex<usize>,
    }

    impl Transport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn role(&self) -> splitlink_transport::LinkRole {
            splitlink_transport::LinkRole::Peripheral
        }

        fn peer_capacity(&self) -> usize {
            1
        }

        fn send(&self, bytes: &[u8]) -> splitlink_transport::Result<usize> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if self.fail_on_call == Some(*calls) {
                return Err(TransportError::NoConnection);
            }
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(bytes.len())
        }
    }

    fn pipeline(capacity: usize) -> SendPipeline {
        let mut registry = ChannelRegistry::new();
        registry.register(1, "one").unwrap();
        registry.register(2, "two").unwrap();
        SendPipeline::new(Arc::new(registry), capacity)
    }

    fn sent_payloads(transport: &ScriptedTransport) -> Vec<(u32, Vec<u8>)> {
        transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| {
                let frame = decode_frame(Bytes::copy_from_slice(bytes)).unwrap();
                (frame.channel_id, frame.payload.to_vec())
            })
            .collect()
    }

    #[test]
    fn enqueue_then_drain_in_order() {
        let pipeline = pipeline(8);
        let one = DeviceHandle::from("one");
        let two = DeviceHandle::from("two");

        assert_eq!(pipeline.enqueue(&one, b"a").unwrap(), 1);
        assert_eq!(pipeline.enqueue(&two, b"bb").unwrap(), 2);
        assert_eq!(pipeline.enqueue(&one, b"ccc").unwrap(), 3);

        let transport = ScriptedTransport::default();
        assert_eq!(pipeline.drain(&transport), 3);
        assert_eq!(
            sent_payloads(&transport),
            vec![
                (1, b"a".to_vec()),
                (2, b"bb".to_vec()),
                (1, b"ccc".to_vec())
            ]
        );
        assert_eq!(pipeline.queued(), 0);
    }

    #[test]
    fn queue_full_rejects_without_corrupting_queue() {
        let pipeline = pipeline(2);
        let one = DeviceHandle::from("one");

        pipeline.enqueue(&one, b"first").unwrap();
        pipeline.enqueue(&one, b"second").unwrap();
        assert_eq!(
            pipeline.enqueue(&one, b"third").unwrap_err(),
            SendError::QueueFull { capacity: 2 }
        );

        let transport = ScriptedTransport::default();
        pipeline.drain(&transport);
        assert_eq!(
            sent_payloads(&transport),
            vec![(1, b"first".to_vec()), (1, b"second".to_vec())]
        );

        let stats = pipeline.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.queue_full, 1);
        assert_eq!(stats.sent, 2);
    }

    #[test]
    fn unknown_device_is_rejected() {
        let pipeline = pipeline(2);
        assert_eq!(
            pipeline
                .enqueue(&DeviceHandle::from("nope"), b"x")
                .unwrap_err(),
            SendError::UnknownDevice("nope".to_string())
        );
        assert_eq!(pipeline.queued(), 0);
    }

    #[test]
    fn transport_failure_drops_one_frame_and_reports_it() {
        let pipeline = pipeline(4);
        let one = DeviceHandle::from("one");
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        pipeline.set_failure_hook(Some(Arc::new(move |failure: &SendFailure| {
            sink.lock().unwrap().push(failure.clone());
        })));

        pipeline.enqueue(&one, b"a").unwrap();
        pipeline.enqueue(&one, b"b").unwrap();
        pipeline.enqueue(&one, b"c").unwrap();

        let transport = ScriptedTransport {
            fail_on_call: Some(2),
            ..ScriptedTransport::default()
        };
        assert_eq!(pipeline.drain(&transport), 3);

        assert_eq!(
            sent_payloads(&transport),
            vec![(1, b"a".to_vec()), (1, b"c".to_vec())]
        );
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].channel_id, 1);
        assert_eq!(failures[0].error, TransportError::NoConnection);
        assert_eq!(pipeline.stats().transport_failures, 1);

        // Nothing is re-queued.
        assert_eq!(pipeline.drain(&transport), 0);
    }

    #[test]
    fn empty_payload_is_framed_and_left_to_the_receiver() {
        let pipeline = pipeline(1);
        assert_eq!(pipeline.enqueue(&DeviceHandle::from("two"), b"").unwrap(), 0);
        let transport = ScriptedTransport::default();
        pipeline.drain(&transport);
        assert_eq!(transport.sent.lock().unwrap()[0].len(), HEADER_SIZE);
    }
}
