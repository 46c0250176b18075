//! Port and pair configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default receive queue size per port
pub const DEFAULT_BUFFER_CAPACITY: usize = ring_buffer::DEFAULT_CAPACITY;

/// Read timeout used when the port's read-total constant is zero
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Settings shared by both ports of a pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairConfig {
    /// Receive queue capacity in bytes (default: 4096)
    pub buffer_capacity: usize,
    /// Fallback read timeout in milliseconds (default: 1000)
    pub default_read_timeout_ms: u64,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            default_read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl PairConfig {
    /// Fallback read timeout as a duration
    pub fn default_read_timeout(&self) -> Duration {
        Duration::from_millis(self.default_read_timeout_ms)
    }
}

/// Data/parity/stop bit settings, in serial driver encoding
///
/// `stop_bits`: 0 = 1, 1 = 1.5, 2 = 2. `parity`: 0 = none, 1 = odd,
/// 2 = even, 3 = mark, 4 = space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineControl {
    pub stop_bits: u8,
    pub parity: u8,
    pub data_bits: u8,
}

impl Default for LineControl {
    fn default() -> Self {
        Self {
            stop_bits: 0,
            parity: 0,
            data_bits: 8,
        }
    }
}

impl LineControl {
    pub const SIZE: usize = 3;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [self.stop_bits, self.parity, self.data_bits]
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            stop_bits: bytes[0],
            parity: bytes[1],
            data_bits: bytes[2],
        }
    }
}

/// Read/write timeout record, all values in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub read_interval: u32,
    pub read_total_multiplier: u32,
    pub read_total_constant: u32,
    pub write_total_multiplier: u32,
    pub write_total_constant: u32,
}

impl Timeouts {
    pub const SIZE: usize = 20;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let fields = [
            self.read_interval,
            self.read_total_multiplier,
            self.read_total_constant,
            self.write_total_multiplier,
            self.write_total_constant,
        ];
        for (chunk, value) in bytes.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            read_interval: word(0),
            read_total_multiplier: word(4),
            read_total_constant: word(8),
            write_total_multiplier: word(12),
            write_total_constant: word(16),
        }
    }
}

/// Per-port emulated serial settings
///
/// Plain data: nothing here participates in the read/write race, it is only
/// consulted for the read timeout and the peer's modem lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub line_control: LineControl,
    pub timeouts: Timeouts,
    pub wait_mask: u32,
    /// Data Terminal Ready output
    pub dtr: bool,
    /// Request To Send output
    pub rts: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            line_control: LineControl::default(),
            timeouts: Timeouts::default(),
            wait_mask: 0,
            dtr: false,
            rts: false,
        }
    }
}
