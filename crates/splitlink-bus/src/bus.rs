use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use splitlink_transport::{ConnectionHandle, InboundSink, Transport};
use tracing::{debug, info};

use crate::config::BusConfig;
use crate::error::{BusError, ReceiveError, RegistryError, Result, SendError};
use crate::receive::{ReceivePipeline, ReceiveStatsSnapshot};
use crate::registry::{ChannelRegistry, Delivery, DeviceHandle};
use crate::send::{SendFailure, SendPipeline, SendStatsSnapshot};
use crate::work::{Job, ManualScheduler, Scheduler, ThreadWorker, WorkKind};

/// Counters for both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub send: SendStatsSnapshot,
    pub receive: ReceiveStatsSnapshot,
}

/// Entry point the link calls with inbound bytes.
struct Inbound {
    pipeline: Arc<ReceivePipeline>,
    dispatch: Arc<dyn Scheduler>,
}

impl Inbound {
    fn accept(&self, source: Option<ConnectionHandle>, bytes: &[u8]) -> std::result::Result<(), ReceiveError> {
        self.pipeline.on_transport_bytes(source, bytes)?;
        self.dispatch.schedule(Duration::ZERO);
        Ok(())
    }
}

impl InboundSink for Inbound {
    fn on_transport_bytes(&self, source: Option<ConnectionHandle>, bytes: &[u8]) {
        // Refusals are already logged and counted by the pipeline.
        let _ = self.accept(source, bytes);
    }
}

/// Workers of a bus built with [`Bus::manual`].
pub struct ManualWorkers {
    pub drain: Arc<ManualScheduler>,
    pub dispatch: Arc<ManualScheduler>,
}

impl ManualWorkers {
    /// Run pending drain and dispatch jobs until neither has work left.
    /// Returns the number of job runs.
    pub fn run_until_idle(&self) -> usize {
        let mut runs = 0usize;
        loop {
            let drained = self.drain.run_pending();
            let dispatched = self.dispatch.run_pending();
            if !drained && !dispatched {
                return runs;
            }
            runs += usize::from(drained) + usize::from(dispatched);
        }
    }
}

/// The logical multi-channel message bus over one transport.
///
/// The transport variant is fixed by the type parameter, so one build
/// carries exactly one transport.
pub struct Bus<T: Transport> {
    registry: Arc<ChannelRegistry>,
    transport: Arc<T>,
    send: Arc<SendPipeline>,
    receive: Arc<ReceivePipeline>,
    drain: Arc<dyn Scheduler>,
    inbound: Arc<Inbound>,
}

/// Everything a bus needs before its workers exist.
struct Parts<T> {
    registry: Arc<ChannelRegistry>,
    transport: Arc<T>,
    send: Arc<SendPipeline>,
    receive: Arc<ReceivePipeline>,
    drain_job: Job,
    dispatch_job: Job,
}

impl<T: Transport> Bus<T> {
    /// Start a bus with one worker thread per pipeline.
    pub fn start(config: &BusConfig, transport: T) -> Result<Self> {
        Self::with_scheduler(config, transport, |kind, job| {
            let worker = ThreadWorker::spawn(kind.name(), job).map_err(|source| BusError::Spawn {
                worker: kind.name(),
                source,
            })?;
            Ok(Arc::new(worker) as Arc<dyn Scheduler>)
        })
    }

    /// Start a bus whose jobs run only when the caller says so.
    pub fn manual(config: &BusConfig, transport: T) -> Result<(Self, ManualWorkers)> {
        let parts = Self::prepare(config, transport)?;
        let workers = ManualWorkers {
            drain: Arc::new(ManualScheduler::new(Arc::clone(&parts.drain_job))),
            dispatch: Arc::new(ManualScheduler::new(Arc::clone(&parts.dispatch_job))),
        };
        let bus = Self::assemble(
            config,
            parts,
            Arc::clone(&workers.drain) as Arc<dyn Scheduler>,
            Arc::clone(&workers.dispatch) as Arc<dyn Scheduler>,
        );
        Ok((bus, workers))
    }

    /// Start a bus whose workers are tokio tasks on the current runtime.
    #[cfg(feature = "async")]
    pub fn start_tokio(config: &BusConfig, transport: T) -> Result<Self> {
        Self::with_scheduler(config, transport, |kind, job| {
            Ok(Arc::new(crate::work::TokioWorker::spawn(kind.name(), job)) as Arc<dyn Scheduler>)
        })
    }

    /// Start a bus with caller-provided workers.
    ///
    /// `spawn` is called once per [`WorkKind`] with the job that worker must
    /// run. Each returned scheduler must never run its job concurrently with
    /// itself.
    pub fn with_scheduler<F>(config: &BusConfig, transport: T, mut spawn: F) -> Result<Self>
    where
        F: FnMut(WorkKind, Job) -> Result<Arc<dyn Scheduler>>,
    {
        let parts = Self::prepare(config, transport)?;
        let drain = spawn(WorkKind::Drain, Arc::clone(&parts.drain_job))?;
        let dispatch = spawn(WorkKind::Dispatch, Arc::clone(&parts.dispatch_job))?;
        Ok(Self::assemble(config, parts, drain, dispatch))
    }

    /// Validate `config` against `transport` and build the pipelines and jobs.
    fn prepare(config: &BusConfig, transport: T) -> Result<Parts<T>> {
        config.validate()?;
        config.check_transport(transport.role(), transport.peer_capacity())?;
        let registry = Arc::new(config.build_registry()?);
        let transport = Arc::new(transport);
        let send = Arc::new(SendPipeline::new(Arc::clone(&registry), config.tx_queue_size));
        let receive = Arc::new(ReceivePipeline::new(
            Arc::clone(&registry),
            config.rx_queue_size,
        ));

        let drain_job: Job = {
            let send = Arc::clone(&send);
            let transport = Arc::clone(&transport);
            Arc::new(move || {
                let sent = send.drain(transport.as_ref());
                debug!(frames = sent, "drain finished");
            })
        };
        let dispatch_job: Job = {
            let receive = Arc::clone(&receive);
            Arc::new(move || {
                let dispatched = receive.dispatch();
                debug!(frames = dispatched, "dispatch finished");
            })
        };

        Ok(Parts {
            registry,
            transport,
            send,
            receive,
            drain_job,
            dispatch_job,
        })
    }

    fn assemble(
        config: &BusConfig,
        parts: Parts<T>,
        drain: Arc<dyn Scheduler>,
        dispatch: Arc<dyn Scheduler>,
    ) -> Self {
        info!(
            transport = parts.transport.name(),
            role = %config.role,
            channels = parts.registry.len(),
            tx_queue = config.tx_queue_size,
            rx_queue = config.rx_queue_size,
            "bus started"
        );

        Self {
            registry: parts.registry,
            transport: parts.transport,
            send: parts.send,
            inbound: Arc::new(Inbound {
                pipeline: Arc::clone(&parts.receive),
                dispatch,
            }),
            receive: parts.receive,
            drain,
        }
    }

    /// Queue `payload` on the channel bound to `device` and schedule a drain
    /// after `delay`.
    ///
    /// Never blocks, so it is safe from timer and event contexts. A later
    /// call replaces the pending drain delay with its own.
    pub fn send(&self, device: &DeviceHandle, payload: &[u8], delay: Duration) -> std::result::Result<usize, SendError> {
        let len = self.send.enqueue(device, payload)?;
        self.drain.schedule(delay);
        Ok(len)
    }

    /// Attach the consumer callback for `device`. The last one set wins.
    pub fn set_receive_callback<F>(&self, device: &DeviceHandle, callback: F) -> std::result::Result<(), RegistryError>
    where
        F: Fn(&Delivery<'_>) + Send + Sync + 'static,
    {
        self.registry.set_receive_callback(device, callback)
    }

    /// Install the side channel for frames the transport refused.
    pub fn set_failure_hook<F>(&self, hook: F)
    where
        F: Fn(&SendFailure) + Send + Sync + 'static,
    {
        self.send.set_failure_hook(Some(Arc::new(hook)));
    }

    /// Feed inbound bytes and schedule a dispatch. Never blocks.
    pub fn on_transport_bytes(
        &self,
        source: Option<ConnectionHandle>,
        bytes: &[u8],
    ) -> std::result::Result<(), ReceiveError> {
        self.inbound.accept(source, bytes)
    }

    /// Sink to hand to the link's inbound path.
    pub fn inbound(&self) -> Arc<dyn InboundSink> {
        Arc::clone(&self.inbound) as Arc<dyn InboundSink>
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            send: self.send.stats(),
            receive: self.receive.stats(),
        }
    }

    /// Frames still waiting in the (send, receive) queues.
    pub fn pending(&self) -> (usize, usize) {
        (self.send.queued(), self.receive.queued())
    }
}
