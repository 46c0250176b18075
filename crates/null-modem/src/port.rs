//! Virtual Port State
//!
//! A port owns its receive ring, its settings and its single read slot.
//! The peer link is a non-owning back-reference set once both ports exist.

use crate::config::{PairConfig, SerialConfig};
use crate::error::NullModemError;
use crate::pending::ReadSlot;
use ring_buffer::ByteRing;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// One endpoint of the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortId {
    A,
    B,
}

impl PortId {
    /// Both ports, in creation order
    pub const ALL: [PortId; 2] = [PortId::A, PortId::B];

    /// Table index (0 or 1)
    pub fn index(self) -> usize {
        match self {
            PortId::A => 0,
            PortId::B => 1,
        }
    }

    /// The cross-wired partner
    pub fn peer(self) -> PortId {
        match self {
            PortId::A => PortId::B,
            PortId::B => PortId::A,
        }
    }

    /// Short label used in metrics
    pub fn label(self) -> &'static str {
        match self {
            PortId::A => "A",
            PortId::B => "B",
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VCOM{}", self.index())
    }
}

/// Byte counters for one port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    /// Bytes this port pushed into its peer
    pub bytes_written: u64,
    /// Bytes delivered to readers of this port
    pub bytes_read: u64,
}

/// Emulated serial port
pub struct Port {
    /// Which end of the pair this is
    id: PortId,
    /// Emulated settings (baud, line control, timeouts, modem outputs)
    config: Mutex<SerialConfig>,
    /// Receive queue, filled by the peer's writes
    rx: ByteRing,
    /// Non-owning link to the partner port
    peer: OnceLock<Weak<Port>>,
    /// Pending read slot and its lock
    pub(crate) reader: ReadSlot,
    /// Runtime that drives read expiration timers
    pub(crate) runtime: Handle,
    /// Timeout used when the read-total constant is zero
    default_read_timeout: Duration,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
}

impl Port {
    /// Create a port with default settings and an empty receive queue
    pub(crate) fn new(
        id: PortId,
        pair: &PairConfig,
        runtime: Handle,
    ) -> Result<Arc<Self>, NullModemError> {
        let rx = ByteRing::new(pair.buffer_capacity)?;

        info!("Created port {} ({} byte receive queue)", id, rx.capacity());

        Ok(Arc::new(Self {
            id,
            config: Mutex::new(SerialConfig::default()),
            rx,
            peer: OnceLock::new(),
            reader: ReadSlot::new(),
            runtime,
            default_read_timeout: pair.default_read_timeout(),
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        }))
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    fn settings(&self) -> MutexGuard<'_, SerialConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current settings
    pub fn config(&self) -> SerialConfig {
        *self.settings()
    }

    /// Apply a change to the settings
    pub fn update_config<F>(&self, f: F)
    where
        F: FnOnce(&mut SerialConfig),
    {
        f(&mut self.settings());
    }

    /// Link this port to its partner
    ///
    /// Returns `false` if a peer was already set; links are never replaced.
    pub(crate) fn link(&self, peer: &Arc<Port>) -> bool {
        let linked = self.peer.set(Arc::downgrade(peer)).is_ok();
        if linked {
            debug!("Linked {} -> {}", self.id, peer.id);
        }
        linked
    }

    /// The partner port, if linked and still alive
    pub fn peer(&self) -> Option<Arc<Port>> {
        self.peer.get().and_then(Weak::upgrade)
    }

    /// Receive queue
    pub fn rx(&self) -> &ByteRing {
        &self.rx
    }

    /// Timeout for a read that is about to pend
    ///
    /// Recomputed on every pend from the read-total constant.
    pub(crate) fn read_timeout(&self) -> Duration {
        match self.settings().timeouts.read_total_constant {
            0 => self.default_read_timeout,
            ms => Duration::from_millis(u64::from(ms)),
        }
    }

    pub(crate) fn record_written(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        metrics::counter!("vserial_bytes_written_total", "port" => self.id.label())
            .increment(bytes as u64);
    }

    pub(crate) fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
        metrics::counter!("vserial_bytes_read_total", "port" => self.id.label())
            .increment(bytes as u64);
    }

    /// Current byte counters
    pub fn stats(&self) -> PortStats {
        PortStats {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("rx", &self.rx)
            .field("linked", &self.peer.get().is_some())
            .field("pending_read", &self.has_pending_read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_id_peer() {
        assert_eq!(PortId::A.peer(), PortId::B);
        assert_eq!(PortId::B.peer(), PortId::A);
        assert_eq!(PortId::B.index(), 1);
        assert_eq!(PortId::B.to_string(), "VCOM1");
    }

    #[tokio::test]
    async fn test_link_is_set_once() {
        let pair = PairConfig::default();
        let a = Port::new(PortId::A, &pair, Handle::current()).unwrap();
        let b = Port::new(PortId::B, &pair, Handle::current()).unwrap();
        let c = Port::new(PortId::B, &pair, Handle::current()).unwrap();

        assert!(a.peer().is_none());
        assert!(a.link(&b));
        assert!(!a.link(&c));
        assert_eq!(a.peer().map(|p| Arc::ptr_eq(&p, &b)), Some(true));
    }

    #[tokio::test]
    async fn test_read_timeout_from_config() {
        let port = Port::new(PortId::A, &PairConfig::default(), Handle::current()).unwrap();
        assert_eq!(port.read_timeout(), Duration::from_secs(1));

        port.update_config(|c| c.timeouts.read_total_constant = 50);
        assert_eq!(port.read_timeout(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_allocation_failure_propagates() {
        let pair = PairConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        let err = Port::new(PortId::A, &pair, Handle::current()).unwrap_err();
        assert!(matches!(err, NullModemError::InsufficientResources(_)));
    }
}
