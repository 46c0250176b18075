//! Hub error types

use null_modem::NullModemError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Virtual port error: {0}")]
    Port(#[from] NullModemError),

    #[error("No bridge with id {0}")]
    UnknownBridge(u32),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}
