//! Virtual Serial Hub
//!
//! User-mode companion to the null-modem pair: relays bytes between real
//! serial devices, TCP clients and the two virtual ports.

pub mod bridge;
pub mod command;
pub mod config;
pub mod error;

pub use bridge::{BridgeKind, BridgeManager, BridgeStats, RelaySettings, SerialEndpoint};
pub use command::Command;
pub use config::HubConfig;
pub use error::HubError;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the global tracing subscriber
pub fn init_logging(level: &str, json: bool) -> Result<(), HubError> {
    let level: Level = level
        .parse()
        .map_err(|_| HubError::Logging(format!("unknown log level '{}'", level)))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.map_err(|e| HubError::Logging(e.to_string()))
}

/// Names of the serial devices present on this machine
pub fn system_ports() -> Result<Vec<String>, HubError> {
    Ok(tokio_serial::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_rejects_unknown_level() {
        assert!(matches!(
            init_logging("chatty", false),
            Err(HubError::Logging(_))
        ));
    }
}
