//! Serial control surface
//!
//! Decodes standard serial control codes and applies them to a port.
//! Everything here is plain get/set of port settings; the only calls into
//! the data path are purge (ring reset), comm status (queue depth) and
//! modem status (peer line mapping).

use crate::config::{LineControl, Timeouts};
use crate::error::NullModemError;
use crate::port::Port;
use tracing::{debug, warn};

pub const FILE_DEVICE_SERIAL_PORT: u32 = 0x0000_001B;
pub const METHOD_BUFFERED: u32 = 0;
pub const FILE_ANY_ACCESS: u32 = 0;

/// Build a device control code the way `CTL_CODE` does
pub const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

const fn serial_code(function: u32) -> u32 {
    ctl_code(FILE_DEVICE_SERIAL_PORT, function, METHOD_BUFFERED, FILE_ANY_ACCESS)
}

pub const IOCTL_SERIAL_SET_BAUD_RATE: u32 = serial_code(1);
pub const IOCTL_SERIAL_SET_QUEUE_SIZE: u32 = serial_code(2);
pub const IOCTL_SERIAL_SET_LINE_CONTROL: u32 = serial_code(3);
pub const IOCTL_SERIAL_SET_BREAK_ON: u32 = serial_code(4);
pub const IOCTL_SERIAL_SET_BREAK_OFF: u32 = serial_code(5);
pub const IOCTL_SERIAL_SET_TIMEOUTS: u32 = serial_code(6);
pub const IOCTL_SERIAL_SET_HANDFLOW: u32 = serial_code(7);
pub const IOCTL_SERIAL_SET_CHARS: u32 = serial_code(8);
pub const IOCTL_SERIAL_SET_DTR: u32 = serial_code(9);
pub const IOCTL_SERIAL_CLR_DTR: u32 = serial_code(10);
pub const IOCTL_SERIAL_SET_RTS: u32 = serial_code(12);
pub const IOCTL_SERIAL_CLR_RTS: u32 = serial_code(13);
pub const IOCTL_SERIAL_SET_WAIT_MASK: u32 = serial_code(16);
pub const IOCTL_SERIAL_GET_WAIT_MASK: u32 = serial_code(17);
pub const IOCTL_SERIAL_WAIT_ON_MASK: u32 = serial_code(18);
pub const IOCTL_SERIAL_PURGE: u32 = serial_code(19);
pub const IOCTL_SERIAL_GET_BAUD_RATE: u32 = serial_code(20);
pub const IOCTL_SERIAL_GET_LINE_CONTROL: u32 = serial_code(21);
pub const IOCTL_SERIAL_GET_TIMEOUTS: u32 = serial_code(22);
pub const IOCTL_SERIAL_GET_HANDFLOW: u32 = serial_code(23);
pub const IOCTL_SERIAL_GET_CHARS: u32 = serial_code(24);
pub const IOCTL_SERIAL_GET_PROPERTIES: u32 = serial_code(25);
pub const IOCTL_SERIAL_GET_MODEMSTATUS: u32 = serial_code(26);
pub const IOCTL_SERIAL_GET_COMMSTATUS: u32 = serial_code(27);

/// Decoded control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialControl {
    GetBaudRate,
    SetBaudRate,
    GetLineControl,
    SetLineControl,
    GetTimeouts,
    SetTimeouts,
    GetWaitMask,
    SetWaitMask,
    SetDtr,
    ClrDtr,
    SetRts,
    ClrRts,
    Purge,
    GetModemStatus,
    GetCommStatus,
    GetProperties,
    /// Accepted for compatibility, has no effect
    NoOp,
}

impl SerialControl {
    pub fn from_code(code: u32) -> Option<Self> {
        let control = match code {
            IOCTL_SERIAL_GET_BAUD_RATE => SerialControl::GetBaudRate,
            IOCTL_SERIAL_SET_BAUD_RATE => SerialControl::SetBaudRate,
            IOCTL_SERIAL_GET_LINE_CONTROL => SerialControl::GetLineControl,
            IOCTL_SERIAL_SET_LINE_CONTROL => SerialControl::SetLineControl,
            IOCTL_SERIAL_GET_TIMEOUTS => SerialControl::GetTimeouts,
            IOCTL_SERIAL_SET_TIMEOUTS => SerialControl::SetTimeouts,
            IOCTL_SERIAL_GET_WAIT_MASK => SerialControl::GetWaitMask,
            IOCTL_SERIAL_SET_WAIT_MASK => SerialControl::SetWaitMask,
            IOCTL_SERIAL_SET_DTR => SerialControl::SetDtr,
            IOCTL_SERIAL_CLR_DTR => SerialControl::ClrDtr,
            IOCTL_SERIAL_SET_RTS => SerialControl::SetRts,
            IOCTL_SERIAL_CLR_RTS => SerialControl::ClrRts,
            IOCTL_SERIAL_PURGE => SerialControl::Purge,
            IOCTL_SERIAL_GET_MODEMSTATUS => SerialControl::GetModemStatus,
            IOCTL_SERIAL_GET_COMMSTATUS => SerialControl::GetCommStatus,
            IOCTL_SERIAL_GET_PROPERTIES => SerialControl::GetProperties,
            IOCTL_SERIAL_SET_QUEUE_SIZE
            | IOCTL_SERIAL_SET_BREAK_ON
            | IOCTL_SERIAL_SET_BREAK_OFF
            | IOCTL_SERIAL_GET_CHARS
            | IOCTL_SERIAL_SET_CHARS
            | IOCTL_SERIAL_GET_HANDFLOW
            | IOCTL_SERIAL_SET_HANDFLOW
            | IOCTL_SERIAL_WAIT_ON_MASK => SerialControl::NoOp,
            _ => return None,
        };
        Some(control)
    }
}

/// Comm status record; only the receive queue depth is tracked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommStatus {
    pub errors: u32,
    pub hold_reasons: u32,
    pub amount_in_in_queue: u32,
    pub amount_in_out_queue: u32,
    pub eof_received: bool,
    pub wait_for_immediate: bool,
}

impl CommStatus {
    pub const SIZE: usize = 18;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.errors.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.hold_reasons.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.amount_in_in_queue.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.amount_in_out_queue.to_le_bytes());
        bytes[16] = u8::from(self.eof_received);
        bytes[17] = u8::from(self.wait_for_immediate);
        bytes
    }
}

/// Static capabilities report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommProperties {
    pub max_tx_queue: u32,
    pub max_rx_queue: u32,
    pub current_tx_queue: u32,
    pub current_rx_queue: u32,
}

impl CommProperties {
    pub const SIZE: usize = 64;

    const SERVICE_MASK: u32 = 0xFFFF_FFFF;
    /// `BAUD_USER` plus 75 baud
    const BAUD_USER: u32 = 0x1000_0001;
    const PROV_CAPABILITIES: u32 = 0xFF;
    const SETTABLE_PARAMS: u32 = 0xFF;
    const SETTABLE_DATA_STOP_PARITY: u32 = 0x0F0F;

    pub fn for_queue(capacity: usize) -> Self {
        let capacity = u32::try_from(capacity).unwrap_or(u32::MAX);
        Self {
            max_tx_queue: capacity,
            max_rx_queue: capacity,
            current_tx_queue: capacity,
            current_rx_queue: capacity,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let words: [u32; 14] = [
            Self::SIZE as u32,
            0,
            Self::SERVICE_MASK,
            0,
            self.max_tx_queue,
            self.max_rx_queue,
            Self::BAUD_USER,
            0,
            Self::PROV_CAPABILITIES,
            Self::SETTABLE_PARAMS,
            Self::BAUD_USER,
            Self::SETTABLE_DATA_STOP_PARITY,
            self.current_tx_queue,
            self.current_rx_queue,
        ];

        let mut bytes = [0u8; Self::SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

fn input_array<const N: usize>(input: &[u8]) -> Result<[u8; N], NullModemError> {
    input
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(NullModemError::BufferTooSmall {
            needed: N,
            actual: input.len(),
        })
}

fn input_u32(input: &[u8]) -> Result<u32, NullModemError> {
    input_array::<4>(input).map(u32::from_le_bytes)
}

fn emit(output: &mut [u8], bytes: &[u8]) -> Result<usize, NullModemError> {
    let actual = output.len();
    let dest = output
        .get_mut(..bytes.len())
        .ok_or(NullModemError::BufferTooSmall {
            needed: bytes.len(),
            actual,
        })?;
    dest.copy_from_slice(bytes);
    Ok(bytes.len())
}

impl Port {
    /// Handle a device control request
    ///
    /// Returns the number of bytes written to `output`. Unknown codes fail
    /// with [`NullModemError::NotSupported`]; short buffers fail with
    /// [`NullModemError::BufferTooSmall`].
    pub fn device_control(
        &self,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, NullModemError> {
        let Some(control) = SerialControl::from_code(code) else {
            warn!("Unknown control code {:#X} on {}", code, self.id());
            return Err(NullModemError::NotSupported(code));
        };

        debug!("{} control request {:?}", self.id(), control);

        match control {
            SerialControl::GetBaudRate => emit(output, &self.config().baud_rate.to_le_bytes()),
            SerialControl::SetBaudRate => {
                let baud = input_u32(input)?;
                self.update_config(|c| c.baud_rate = baud);
                Ok(0)
            }
            SerialControl::GetLineControl => emit(output, &self.config().line_control.to_bytes()),
            SerialControl::SetLineControl => {
                let line = LineControl::from_bytes(input_array(input)?);
                self.update_config(|c| c.line_control = line);
                Ok(0)
            }
            SerialControl::GetTimeouts => emit(output, &self.config().timeouts.to_bytes()),
            SerialControl::SetTimeouts => {
                let timeouts = Timeouts::from_bytes(input_array(input)?);
                self.update_config(|c| c.timeouts = timeouts);
                Ok(0)
            }
            SerialControl::GetWaitMask => emit(output, &self.config().wait_mask.to_le_bytes()),
            SerialControl::SetWaitMask => {
                let mask = input_u32(input)?;
                self.update_config(|c| c.wait_mask = mask);
                Ok(0)
            }
            SerialControl::SetDtr => {
                self.update_config(|c| c.dtr = true);
                Ok(0)
            }
            SerialControl::ClrDtr => {
                self.update_config(|c| c.dtr = false);
                Ok(0)
            }
            SerialControl::SetRts => {
                self.update_config(|c| c.rts = true);
                Ok(0)
            }
            SerialControl::ClrRts => {
                self.update_config(|c| c.rts = false);
                Ok(0)
            }
            SerialControl::Purge => {
                self.rx().reset();
                Ok(0)
            }
            SerialControl::GetModemStatus => emit(output, &self.modem_status().bits().to_le_bytes()),
            SerialControl::GetCommStatus => {
                let status = CommStatus {
                    amount_in_in_queue: u32::try_from(self.rx().available()).unwrap_or(u32::MAX),
                    ..Default::default()
                };
                emit(output, &status.to_bytes())
            }
            SerialControl::GetProperties => {
                emit(output, &CommProperties::for_queue(self.rx().capacity()).to_bytes())
            }
            SerialControl::NoOp => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PairConfig;
    use crate::port::PortId;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    fn linked_pair() -> (Arc<Port>, Arc<Port>) {
        let config = PairConfig::default();
        let a = Port::new(PortId::A, &config, Handle::current()).unwrap();
        let b = Port::new(PortId::B, &config, Handle::current()).unwrap();
        a.link(&b);
        b.link(&a);
        (a, b)
    }

    #[test]
    fn test_control_codes_match_ctl_code_layout() {
        assert_eq!(IOCTL_SERIAL_SET_BAUD_RATE, 0x001B_0004);
        assert_eq!(IOCTL_SERIAL_GET_BAUD_RATE, 0x001B_0050);
        assert_eq!(IOCTL_SERIAL_GET_MODEMSTATUS, 0x001B_0068);
        assert_eq!(IOCTL_SERIAL_GET_COMMSTATUS, 0x001B_006C);
    }

    #[tokio::test]
    async fn test_baud_rate_roundtrip() {
        let (a, _b) = linked_pair();
        let mut out = [0u8; 4];

        assert_eq!(a.device_control(IOCTL_SERIAL_GET_BAUD_RATE, &[], &mut out), Ok(4));
        assert_eq!(u32::from_le_bytes(out), 9600);

        a.device_control(IOCTL_SERIAL_SET_BAUD_RATE, &115_200u32.to_le_bytes(), &mut [])
            .unwrap();
        assert_eq!(a.config().baud_rate, 115_200);
    }

    #[tokio::test]
    async fn test_line_control_layout() {
        let (a, _b) = linked_pair();
        a.device_control(IOCTL_SERIAL_SET_LINE_CONTROL, &[2, 1, 7], &mut [])
            .unwrap();

        let mut out = [0u8; 3];
        a.device_control(IOCTL_SERIAL_GET_LINE_CONTROL, &[], &mut out)
            .unwrap();
        assert_eq!(out, [2, 1, 7]);
        assert_eq!(a.config().line_control.data_bits, 7);
    }

    #[tokio::test]
    async fn test_short_buffers_rejected() {
        let (a, _b) = linked_pair();
        let mut out = [0u8; 2];

        assert_eq!(
            a.device_control(IOCTL_SERIAL_GET_BAUD_RATE, &[], &mut out),
            Err(NullModemError::BufferTooSmall { needed: 4, actual: 2 })
        );
        assert_eq!(
            a.device_control(IOCTL_SERIAL_SET_TIMEOUTS, &[0u8; 8], &mut []),
            Err(NullModemError::BufferTooSmall { needed: 20, actual: 8 })
        );
    }

    #[tokio::test]
    async fn test_dtr_rts_drive_peer_modem_status() {
        let (a, b) = linked_pair();
        b.device_control(IOCTL_SERIAL_SET_DTR, &[], &mut []).unwrap();
        b.device_control(IOCTL_SERIAL_CLR_RTS, &[], &mut []).unwrap();

        let mut out = [0u8; 4];
        a.device_control(IOCTL_SERIAL_GET_MODEMSTATUS, &[], &mut out)
            .unwrap();
        assert_eq!(u32::from_le_bytes(out), 0x20 | 0x80);
    }

    #[tokio::test]
    async fn test_comm_status_reports_queue_depth() {
        let (a, b) = linked_pair();
        b.write(b"12345").unwrap();

        let mut out = [0u8; CommStatus::SIZE];
        assert_eq!(a.device_control(IOCTL_SERIAL_GET_COMMSTATUS, &[], &mut out), Ok(18));
        assert_eq!(u32::from_le_bytes([out[8], out[9], out[10], out[11]]), 5);
    }

    #[tokio::test]
    async fn test_purge_discards_queue() {
        let (a, b) = linked_pair();
        b.write(b"stale").unwrap();
        a.device_control(IOCTL_SERIAL_PURGE, &[0u8; 4], &mut []).unwrap();
        assert_eq!(a.rx().available(), 0);
    }

    #[tokio::test]
    async fn test_properties_report() {
        let (a, _b) = linked_pair();
        let mut out = [0u8; 64];
        assert_eq!(a.device_control(IOCTL_SERIAL_GET_PROPERTIES, &[], &mut out), Ok(64));

        let word = |i: usize| u32::from_le_bytes([out[i * 4], out[i * 4 + 1], out[i * 4 + 2], out[i * 4 + 3]]);
        assert_eq!(word(0), 64);
        assert_eq!(word(2), 0xFFFF_FFFF);
        assert_eq!(word(5), 4096);
        assert_eq!(word(6), 0x1000_0001);
    }

    #[tokio::test]
    async fn test_compat_codes_accepted_unknown_rejected() {
        let (a, _b) = linked_pair();
        assert_eq!(a.device_control(IOCTL_SERIAL_SET_BREAK_ON, &[], &mut []), Ok(0));
        assert_eq!(a.device_control(IOCTL_SERIAL_WAIT_ON_MASK, &[], &mut []), Ok(0));

        let unknown = serial_code(40);
        assert_eq!(
            a.device_control(unknown, &[], &mut []),
            Err(NullModemError::NotSupported(unknown))
        );
    }
}
