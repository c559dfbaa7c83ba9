//! Split loopback example: a peripheral half talks to a central half over an
//! in-memory link on two channels.
//!
//! Run with:
//!   cargo run --example split-loopback

use std::sync::Arc;
use std::time::Duration;

use splitlink::bus::{Bus, BusConfig, Role};
use splitlink::transport::{
    CentralTransport, ConnectionHandle, Endpoint, MemoryLink, PeripheralTransport,
};
use splitlink::DeviceHandle;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let conn = ConnectionHandle(1);
    let peripheral_config = BusConfig::default()
        .with_channel(1, "keys")
        .with_channel(2, "battery");
    let central_config = BusConfig {
        role: Role::Central,
        max_peers: 1,
        ..peripheral_config.clone()
    };

    let peripheral_link = Arc::new(MemoryLink::default());
    let central_link = Arc::new(MemoryLink::default());

    let peripheral_transport = PeripheralTransport::new(Arc::clone(&peripheral_link), Endpoint(0x10));
    peripheral_transport.on_connected(conn);
    let central_transport =
        CentralTransport::new(Arc::clone(&central_link), central_config.central_config());
    central_transport.on_connected(conn)?;
    central_transport.on_endpoint_ready(conn, Endpoint(0x10))?;

    let (peripheral, peripheral_workers) = Bus::manual(&peripheral_config, peripheral_transport)?;
    let (central, central_workers) = Bus::manual(&central_config, central_transport)?;

    peripheral_link.route(conn, central.inbound(), Some(conn));
    central_link.route(conn, peripheral.inbound(), None);

    for device in ["keys", "battery"] {
        let handle = DeviceHandle::from(device);
        central.set_receive_callback(&handle, |delivery| {
            eprintln!(
                "[central] channel={} device={} from={:?} payload={}",
                delivery.channel_id,
                delivery.device,
                delivery.source,
                String::from_utf8_lossy(delivery.payload)
            );
        })?;
        peripheral.set_receive_callback(&handle, |delivery| {
            eprintln!(
                "[peripheral] channel={} device={} payload={}",
                delivery.channel_id,
                delivery.device,
                String::from_utf8_lossy(delivery.payload)
            );
        })?;
    }

    peripheral.send(&DeviceHandle::from("keys"), b"press 0x04", Duration::ZERO)?;
    peripheral.send(&DeviceHandle::from("battery"), b"87%", Duration::ZERO)?;
    central.send(&DeviceHandle::from("keys"), b"layer 2", Duration::ZERO)?;

    // Drain the peripheral first so its frames land in the central's queue.
    peripheral_workers.run_until_idle();
    central_workers.run_until_idle();
    peripheral_workers.run_until_idle();

    eprintln!(
        "[stats] peripheral={:?} central={:?}",
        peripheral.stats(),
        central.stats()
    );
    Ok(())
}
