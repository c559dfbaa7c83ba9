use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use splitlink_bus::{Bus, BusConfig, Delivery, DeviceHandle, Role, SendFailure};
use splitlink_transport::{
    CentralTransport, ConnectionHandle, Endpoint, MemoryLink, PeripheralTransport,
    TransportError, DEFAULT_MEMORY_MAX_PAYLOAD,
};
use tracing::{info, warn};

use crate::cmd::LoopbackArgs;
use crate::exit::{
    bus_error, config_error, send_error, transport_error, CliError, CliResult, FAILURE, INTERNAL,
    SUCCESS, USAGE,
};
use crate::output::{
    payload_preview, print_loopback, DeliveryRecord, FailureRecord, LoopbackReport, OutputFormat,
    SideStats,
};

const LOOPBACK_ENDPOINT: Endpoint = Endpoint(0x10);
const CENTRAL: &str = "central";

enum Event {
    Delivered(DeliveryRecord),
    Failed(FailureRecord, TransportError),
    /// One peer missed a central fan-out that reached others.
    PeerFailed(FailureRecord, TransportError),
}

type PeripheralBus = Bus<PeripheralTransport<Arc<MemoryLink>>>;

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    if args.peers == 0 {
        return Err(CliError::new(USAGE, "--peers must be at least 1"));
    }
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be at least 1"));
    }
    let delay = parse_duration(&args.delay, true)?;
    let timeout = parse_duration(&args.timeout, false)?;
    let peers = usize::from(args.peers);

    let mut base = match &args.config {
        Some(path) => BusConfig::from_path(path).map_err(|err| config_error("loopback", err))?,
        None => {
            let needed = args.count.saturating_mul(peers);
            BusConfig {
                tx_queue_size: needed.max(splitlink_bus::DEFAULT_TX_QUEUE_SIZE),
                rx_queue_size: needed.max(splitlink_bus::DEFAULT_RX_QUEUE_SIZE),
                ..BusConfig::default()
            }
        }
    };
    if base.channels.is_empty() {
        base = base.with_channel(args.channel.unwrap_or(1), "loopback");
    }
    let channel = match args.channel {
        Some(id) => base.channels.iter().find(|c| c.channel_id == id),
        None => base.channels.first(),
    }
    .cloned()
    .ok_or_else(|| {
        CliError::new(
            USAGE,
            format!("channel {} is not configured", args.channel.unwrap_or_default()),
        )
    })?;
    let device = DeviceHandle::from(channel.device.as_str());

    let peripheral_config = BusConfig {
        role: Role::Peripheral,
        ..base.clone()
    };
    let central_config = BusConfig {
        role: Role::Central,
        max_peers: peers,
        ..base
    };
    let mtu = args.mtu.unwrap_or(DEFAULT_MEMORY_MAX_PAYLOAD);
    let (events, inbox) = mpsc::channel::<Event>();

    let central_link = Arc::new(MemoryLink::new(mtu));
    let central_transport =
        CentralTransport::new(Arc::clone(&central_link), central_config.central_config());
    for raw in 1..=args.peers {
        let conn = ConnectionHandle(raw);
        central_transport
            .on_connected(conn)
            .and_then(|_| central_transport.on_endpoint_ready(conn, LOOPBACK_ENDPOINT))
            .map_err(|err| transport_error("central association failed", err))?;
    }
    {
        let events = events.clone();
        let device = device.to_string();
        let channel_id = channel.channel_id;
        central_transport.set_peer_failure_hook(move |conn, err| {
            let _ = events.send(Event::PeerFailed(
                FailureRecord {
                    sender: format!("{CENTRAL} -> {conn}"),
                    channel_id,
                    device: device.clone(),
                    error: err.to_string(),
                },
                err.clone(),
            ));
        });
    }
    let central = Bus::start(&central_config, central_transport)
        .map_err(|err| bus_error("central start failed", err))?;
    attach(&central, CENTRAL, &device, &events)?;

    let mut peripherals: Vec<(String, PeripheralBus)> = Vec::with_capacity(peers);
    for raw in 1..=args.peers {
        let conn = ConnectionHandle(raw);
        let name = format!("peripheral-{raw}");
        let link = Arc::new(MemoryLink::new(mtu));
        let transport = PeripheralTransport::new(Arc::clone(&link), LOOPBACK_ENDPOINT);
        transport.on_connected(conn);
        let bus = Bus::start(&peripheral_config, transport)
            .map_err(|err| bus_error(&format!("{name} start failed"), err))?;
        attach(&bus, &name, &device, &events)?;

        link.route(conn, central.inbound(), Some(conn));
        central_link.route(conn, bus.inbound(), None);
        peripherals.push((name, bus));
    }
    drop(events);

    info!(
        channel_id = channel.channel_id,
        device = %device,
        peers,
        count = args.count,
        "loopback started"
    );

    let payload = args.data.as_bytes();
    for _ in 0..args.count {
        for (name, bus) in &peripherals {
            bus.send(&device, payload, delay)
                .map_err(|err| send_error(&format!("{name} send failed"), err))?;
        }
        central
            .send(&device, payload, delay)
            .map_err(|err| send_error("central send failed", err))?;
    }

    let expected = args.count.saturating_mul(peers);
    let mut progress = Progress::new(expected, peers);
    let mut errors = Vec::new();
    let deadline = Instant::now() + timeout + delay;
    while !progress.done() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match inbox.recv_timeout(remaining) {
            Ok(Event::Delivered(record)) => progress.delivered(record),
            Ok(Event::Failed(record, err)) => {
                progress.failed(record);
                errors.push(err);
            }
            Ok(Event::PeerFailed(record, err)) => {
                progress.peer_failed(record);
                errors.push(err);
            }
            Err(_) => break,
        }
    }

    let mut stats: Vec<SideStats> = peripherals
        .iter()
        .map(|(name, bus)| SideStats {
            side: name.clone(),
            stats: bus.stats(),
        })
        .collect();
    stats.push(SideStats {
        side: CENTRAL.to_string(),
        stats: central.stats(),
    });

    let complete = progress.done();
    let mut report = progress.into_report(channel.channel_id, device.name(), stats);
    report.deliveries.sort_by(|a, b| a.receiver.cmp(&b.receiver));
    print_loopback(&report, format);

    if let Some(err) = errors
        .iter()
        .find(|err| matches!(err, TransportError::PayloadTooLarge { .. }))
        .or_else(|| errors.first())
    {
        return Err(transport_error(
            &format!("{} frame(s) refused by the transport", errors.len()),
            err.clone(),
        ));
    }
    if !complete {
        warn!(
            delivered = report.deliveries.len(),
            expected = report.expected,
            "loopback timed out"
        );
        return Err(CliError::new(
            FAILURE,
            format!(
                "timed out after {} of {} deliveries",
                report.deliveries.len(),
                report.expected
            ),
        ));
    }
    Ok(SUCCESS)
}

/// Wire the consumer callback and failure hook of one side into `events`.
fn attach<T: splitlink_transport::Transport>(
    bus: &Bus<T>,
    name: &str,
    device: &DeviceHandle,
    events: &Sender<Event>,
) -> CliResult<()> {
    let receiver = name.to_string();
    let deliveries = events.clone();
    bus.set_receive_callback(device, move |delivery: &Delivery<'_>| {
        let _ = deliveries.send(Event::Delivered(DeliveryRecord {
            receiver: receiver.clone(),
            channel_id: delivery.channel_id,
            device: delivery.device.to_string(),
            source: delivery.source.map(|conn| conn.0),
            payload_size: delivery.payload.len(),
            payload: payload_preview(delivery.payload),
        }));
    })
    .map_err(|err| CliError::new(INTERNAL, format!("{name}: {err}")))?;

    let sender = name.to_string();
    let failures = events.clone();
    bus.set_failure_hook(move |failure: &SendFailure| {
        let _ = failures.send(Event::Failed(
            FailureRecord {
                sender: sender.clone(),
                channel_id: failure.channel_id,
                device: failure.device.to_string(),
                error: failure.error.to_string(),
            },
            failure.error.clone(),
        ));
    });
    Ok(())
}

/// Tracks outstanding messages in both directions.
///
/// Each peripheral message ends as one central delivery or one peripheral
/// failure. Each central message ends, per peer, as one delivery or one
/// missed-peer report, or for every peer at once as one central failure.
struct Progress {
    expected: usize,
    peers: usize,
    upstream: usize,
    downstream: usize,
    deliveries: Vec<DeliveryRecord>,
    failures: Vec<FailureRecord>,
}

impl Progress {
    fn new(expected: usize, peers: usize) -> Self {
        Self {
            expected,
            peers,
            upstream: 0,
            downstream: 0,
            deliveries: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn delivered(&mut self, record: DeliveryRecord) {
        if record.receiver == CENTRAL {
            self.upstream += 1;
        } else {
            self.downstream += 1;
        }
        self.deliveries.push(record);
    }

    fn failed(&mut self, record: FailureRecord) {
        if record.sender == CENTRAL {
            self.downstream += self.peers;
        } else {
            self.upstream += 1;
        }
        self.failures.push(record);
    }

    fn peer_failed(&mut self, record: FailureRecord) {
        self.downstream += 1;
        self.failures.push(record);
    }

    fn done(&self) -> bool {
        self.upstream >= self.expected && self.downstream >= self.expected
    }

    fn into_report(self, channel_id: u32, device: &str, stats: Vec<SideStats>) -> LoopbackReport {
        LoopbackReport {
            channel_id,
            device: device.to_string(),
            expected: self.expected * 2,
            deliveries: self.deliveries,
            failures: self.failures,
            stats,
        }
    }
}

fn parse_duration(input: &str, allow_zero: bool) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, true)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 && !allow_zero {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        Ok(Duration::from_secs(value))
    }
}
