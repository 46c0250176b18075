//! Byte Ring Buffer
//!
//! Provides the bounded receive queue behind each virtual serial port.
//! Producers never wait on it: a push that does not fit is truncated and
//! the short count is the only signal the caller gets.

mod buffer;

pub use buffer::{ByteRing, DEFAULT_CAPACITY};

use thiserror::Error;

/// Errors raised while setting up a ring
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    /// Backing storage could not be reserved
    #[error("Failed to allocate {capacity} bytes of ring storage")]
    AllocationFailed { capacity: usize },

    /// A ring must hold at least one byte
    #[error("Ring capacity must be non-zero")]
    ZeroCapacity,
}
