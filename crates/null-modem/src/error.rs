//! Null-Modem Error Types

use crate::port::PortId;
use thiserror::Error;

/// NT status values reported to the I/O surface
pub mod status {
    pub const STATUS_SUCCESS: u32 = 0x0000_0000;
    pub const STATUS_PENDING: u32 = 0x0000_0103;
    pub const STATUS_DEVICE_BUSY: u32 = 0x8000_0011;
    pub const STATUS_BUFFER_TOO_SMALL: u32 = 0xC000_0023;
    pub const STATUS_PORT_DISCONNECTED: u32 = 0xC000_0037;
    pub const STATUS_INSUFFICIENT_RESOURCES: u32 = 0xC000_009A;
    pub const STATUS_NOT_SUPPORTED: u32 = 0xC000_00BB;
    pub const STATUS_NO_SUCH_DEVICE: u32 = 0xC000_000E;
    pub const STATUS_CANCELLED: u32 = 0xC000_0120;
}

/// Errors surfaced synchronously by port operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NullModemError {
    /// Receive queue storage could not be allocated
    #[error("Insufficient resources to create port: {0}")]
    InsufficientResources(#[from] ring_buffer::RingError),

    /// A read is already parked on this port
    #[error("Port {0} already has a pending read")]
    Busy(PortId),

    /// The port has no linked peer to write to
    #[error("Port {0} is not connected to a peer")]
    Disconnected(PortId),

    /// Control code not implemented by the emulated device
    #[error("Control code {0:#010X} is not supported")]
    NotSupported(u32),

    /// Caller-supplied buffer is shorter than the request needs
    #[error("Buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    /// Port has not been created or was already torn down
    #[error("Port {0} is not available")]
    PortUnavailable(PortId),

    /// Expiration timers need a Tokio runtime to run on
    #[error("No Tokio runtime available for read timers")]
    NoRuntime,
}

impl NullModemError {
    /// Map the error to the NT status the driver surface would report
    pub fn status(&self) -> u32 {
        match self {
            NullModemError::InsufficientResources(_) => status::STATUS_INSUFFICIENT_RESOURCES,
            NullModemError::Busy(_) => status::STATUS_DEVICE_BUSY,
            NullModemError::Disconnected(_) => status::STATUS_PORT_DISCONNECTED,
            NullModemError::NotSupported(_) => status::STATUS_NOT_SUPPORTED,
            NullModemError::BufferTooSmall { .. } => status::STATUS_BUFFER_TOO_SMALL,
            NullModemError::PortUnavailable(_) | NullModemError::NoRuntime => {
                status::STATUS_NO_SUCH_DEVICE
            }
        }
    }
}
