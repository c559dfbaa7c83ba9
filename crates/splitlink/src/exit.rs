use std::fmt;

use splitlink_bus::{BusError, ConfigError, SendError};
use splitlink_transport::TransportError;

// Exit codes follow the sysexits-style table used across the CLI.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const CONFIG_ERROR: i32 = 78;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn config_error(context: &str, err: ConfigError) -> CliError {
    CliError::new(CONFIG_ERROR, format!("{context}: {err}"))
}

pub fn bus_error(context: &str, err: BusError) -> CliError {
    match err {
        BusError::Config(err) => config_error(context, err),
        BusError::Spawn { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn send_error(context: &str, err: SendError) -> CliError {
    match err {
        SendError::UnknownDevice(_) => CliError::new(USAGE, format!("{context}: {err}")),
        SendError::Frame(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        SendError::QueueFull { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        SendError::AllocationFailure { .. } => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
    }
}
