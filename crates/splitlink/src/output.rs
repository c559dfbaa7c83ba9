use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use splitlink_bus::{BusConfig, BusStats, Role};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A message a bus handed to its consumer.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub receiver: String,
    pub channel_id: u32,
    pub device: String,
    pub source: Option<u16>,
    pub payload_size: usize,
    pub payload: String,
}

/// A frame the transport refused.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub sender: String,
    pub channel_id: u32,
    pub device: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SideStats {
    pub side: String,
    #[serde(flatten)]
    pub stats: BusStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopbackReport {
    pub channel_id: u32,
    pub device: String,
    pub expected: usize,
    pub deliveries: Vec<DeliveryRecord>,
    pub failures: Vec<FailureRecord>,
    pub stats: Vec<SideStats>,
}

#[derive(Serialize)]
struct ConfigOutput<'a> {
    path: &'a str,
    valid: bool,
    #[serde(flatten)]
    config: &'a BusConfig,
}

pub fn print_config(path: &str, config: &BusConfig, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ConfigOutput {
                path,
                valid: true,
                config,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut settings = new_table(vec!["ROLE", "TX QUEUE", "RX QUEUE", "MAX PEERS", "PACE MS"]);
            settings.add_row(vec![
                role_name(config.role).to_string(),
                config.tx_queue_size.to_string(),
                config.rx_queue_size.to_string(),
                config.max_peers.to_string(),
                config.fan_out_pace_ms.to_string(),
            ]);
            println!("{settings}");

            let mut channels = new_table(vec!["CHANNEL", "DEVICE"]);
            for channel in &config.channels {
                channels.add_row(vec![channel.channel_id.to_string(), channel.device.clone()]);
            }
            println!("{channels}");
        }
        OutputFormat::Pretty => {
            println!(
                "{path}: ok role={} tx_queue={} rx_queue={} max_peers={} pace_ms={}",
                role_name(config.role),
                config.tx_queue_size,
                config.rx_queue_size,
                config.max_peers,
                config.fan_out_pace_ms
            );
            for channel in &config.channels {
                println!("  channel={} device={}", channel.channel_id, channel.device);
            }
        }
    }
}

pub fn print_loopback(report: &LoopbackReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut deliveries = new_table(vec!["RECEIVER", "CHANNEL", "DEVICE", "FROM", "SIZE", "PAYLOAD"]);
            for delivery in &report.deliveries {
                deliveries.add_row(vec![
                    delivery.receiver.clone(),
                    delivery.channel_id.to_string(),
                    delivery.device.clone(),
                    source_label(delivery.source),
                    delivery.payload_size.to_string(),
                    delivery.payload.clone(),
                ]);
            }
            println!("{deliveries}");

            if !report.failures.is_empty() {
                let mut failures = new_table(vec!["SENDER", "CHANNEL", "DEVICE", "ERROR"]);
                for failure in &report.failures {
                    failures.add_row(vec![
                        failure.sender.clone(),
                        failure.channel_id.to_string(),
                        failure.device.clone(),
                        failure.error.clone(),
                    ]);
                }
                println!("{failures}");
            }

            let mut stats = new_table(vec![
                "SIDE", "ENQUEUED", "SENT", "TX FULL", "TX FAILED", "RECEIVED", "DISPATCHED",
                "RX FULL", "MALFORMED", "UNROUTABLE", "NO CALLBACK", "PANICS",
            ]);
            for side in &report.stats {
                let send = side.stats.send;
                let receive = side.stats.receive;
                stats.add_row(vec![
                    side.side.clone(),
                    send.enqueued.to_string(),
                    send.sent.to_string(),
                    send.queue_full.to_string(),
                    send.transport_failures.to_string(),
                    receive.received.to_string(),
                    receive.dispatched.to_string(),
                    receive.queue_full.to_string(),
                    receive.malformed.to_string(),
                    receive.unroutable.to_string(),
                    receive.no_callback.to_string(),
                    receive.callback_panics.to_string(),
                ]);
            }
            println!("{stats}");
        }
        OutputFormat::Pretty => {
            for delivery in &report.deliveries {
                println!(
                    "{} <- channel={} ({}) from={} size={} payload={}",
                    delivery.receiver,
                    delivery.channel_id,
                    delivery.device,
                    source_label(delivery.source),
                    delivery.payload_size,
                    delivery.payload
                );
            }
            for failure in &report.failures {
                println!(
                    "{} !! channel={} ({}) error={}",
                    failure.sender, failure.channel_id, failure.device, failure.error
                );
            }
            println!(
                "delivered {}/{} failed {}",
                report.deliveries.len(),
                report.expected,
                report.failures.len()
            );
        }
    }
}

pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Peripheral => "peripheral",
        Role::Central => "central",
    }
}

fn source_label(source: Option<u16>) -> String {
    source.map_or_else(|| "central".to_string(), |conn| format!("conn#{conn}"))
}
