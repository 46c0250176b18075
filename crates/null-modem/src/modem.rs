//! Modem-Signal Mapper
//!
//! Null-modem wiring of the control lines: the peer's DTR drives our DSR
//! and DCD, the peer's RTS drives our CTS.

use crate::config::SerialConfig;
use crate::port::Port;
use bitflags::bitflags;

bitflags! {
    /// Modem status register bits, as reported by the modem-status query
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModemStatus: u32 {
        /// Clear To Send
        const CTS = 0x10;
        /// Data Set Ready
        const DSR = 0x20;
        /// Ring Indicator
        const RI = 0x40;
        /// Data Carrier Detect
        const DCD = 0x80;
    }
}

impl ModemStatus {
    /// Input lines seen by a port whose peer has the given outputs
    pub fn from_peer_outputs(peer: &SerialConfig) -> Self {
        let mut status = ModemStatus::empty();
        if peer.dtr {
            status |= ModemStatus::DSR | ModemStatus::DCD;
        }
        if peer.rts {
            status |= ModemStatus::CTS;
        }
        status
    }
}

impl Port {
    /// Current input line state, derived from the peer's outputs
    ///
    /// Reports no active lines when the port has no peer.
    pub fn modem_status(&self) -> ModemStatus {
        self.peer()
            .map(|peer| ModemStatus::from_peer_outputs(&peer.config()))
            .unwrap_or_else(ModemStatus::empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtr_maps_to_dsr_and_dcd() {
        let peer = SerialConfig {
            dtr: true,
            rts: false,
            ..Default::default()
        };
        let status = ModemStatus::from_peer_outputs(&peer);
        assert!(status.contains(ModemStatus::DSR | ModemStatus::DCD));
        assert!(!status.contains(ModemStatus::CTS));
        assert_eq!(status.bits(), 0xA0);
    }

    #[test]
    fn test_rts_maps_to_cts() {
        let peer = SerialConfig {
            rts: true,
            ..Default::default()
        };
        assert_eq!(ModemStatus::from_peer_outputs(&peer), ModemStatus::CTS);
    }

    #[test]
    fn test_idle_lines() {
        assert!(ModemStatus::from_peer_outputs(&SerialConfig::default()).is_empty());
    }
}
