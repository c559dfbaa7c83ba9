use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod check;
pub mod loopback;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate a bus config, then print its channel table.
    Check(CheckArgs),
    /// Run a peripheral and central bus in-process over memory links.
    Loopback(LoopbackArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Check(args) => check::run(args, format),
        Command::Loopback(args) => loopback::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// JSON bus config to validate.
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// JSON bus config supplying channels and queue sizes.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Channel to send on. Default: the first configured channel.
    #[arg(long, short = 'c')]
    pub channel: Option<u32>,
    /// Payload to send, as UTF-8 text.
    #[arg(long)]
    pub data: String,
    /// Messages each side sends.
    #[arg(long, default_value = "1")]
    pub count: usize,
    /// Delay before each drain (e.g. 0ms, 20ms, 1s).
    #[arg(long, default_value = "0ms")]
    pub delay: String,
    /// Peripherals attached to the central.
    #[arg(long, default_value = "1")]
    pub peers: u16,
    /// Largest write the memory links accept, in bytes.
    #[arg(long, value_name = "BYTES")]
    pub mtu: Option<usize>,
    /// Give up waiting for deliveries after this long.
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
