//! Bridge Management
//!
//! A bridge is one running relay: serial <-> serial, a TCP loopback, or
//! serial <-> TCP. Each runs as a single Tokio task that owns its client
//! tasks, so aborting it tears the whole bridge down.

mod endpoint;
mod relay;

pub use endpoint::{SerialEndpoint, SerialReader, SerialWriter, DEFAULT_BAUD_RATE};

use crate::config::HubConfig;
use crate::error::HubError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

/// Byte counters for one bridge
///
/// `rx` counts bytes taken from the bridge's first endpoint (or from TCP
/// clients, for a loopback); `tx` counts bytes delivered back to it.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub(crate) rx: AtomicU64,
    pub(crate) tx: AtomicU64,
}

impl BridgeStats {
    fn add(counter: &AtomicU64, bytes: usize) {
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn rx(&self) -> u64 {
        self.rx.load(Ordering::Relaxed)
    }

    pub fn tx(&self) -> u64 {
        self.tx.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    Serial,
    Loopback,
    TcpSerial,
}

impl fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BridgeKind::Serial => "serial",
            BridgeKind::Loopback => "loopback",
            BridgeKind::TcpSerial => "tcpserial",
        })
    }
}

/// Relay tuning shared by every bridge
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub buffer_size: usize,
    pub poll_interval: Duration,
    /// How long a virtual write may make no progress before the rest is dropped
    pub stall_timeout: Duration,
}

impl From<&HubConfig> for RelaySettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            buffer_size: config.relay_buffer_size,
            poll_interval: config.poll_interval(),
            stall_timeout: config.write_stall_timeout(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

struct RunningBridge {
    kind: BridgeKind,
    endpoints: String,
    listen_port: Option<u16>,
    stats: Arc<BridgeStats>,
    task: JoinHandle<()>,
}

/// Registry of running bridges
pub struct BridgeManager {
    relay: RelaySettings,
    next_id: u32,
    bridges: BTreeMap<u32, RunningBridge>,
}

impl BridgeManager {
    pub fn new(relay: RelaySettings) -> Self {
        Self {
            relay,
            next_id: 1,
            bridges: BTreeMap::new(),
        }
    }

    fn register(
        &mut self,
        kind: BridgeKind,
        endpoints: String,
        listen_port: Option<u16>,
        stats: Arc<BridgeStats>,
        task: JoinHandle<()>,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        info!("Bridge {} started: {} {}", id, kind, endpoints);
        self.bridges.insert(
            id,
            RunningBridge {
                kind,
                endpoints,
                listen_port,
                stats,
                task,
            },
        );
        id
    }

    /// Relay both ways between two serial endpoints
    pub fn start_serial_bridge(
        &mut self,
        first: SerialEndpoint,
        second: SerialEndpoint,
    ) -> Result<u32, HubError> {
        let first_io = first.open(&self.relay)?;
        let second_io = second.open(&self.relay)?;
        let stats = Arc::new(BridgeStats::default());

        let task = tokio::spawn(relay::run_serial_bridge(
            first_io,
            second_io,
            Arc::clone(&stats),
            self.relay.buffer_size,
        ));

        Ok(self.register(
            BridgeKind::Serial,
            format!("{} <-> {}", first, second),
            None,
            stats,
            task,
        ))
    }

    /// TCP server relaying each client's data to every other client
    pub async fn start_loopback(&mut self, port: u16) -> Result<u32, HubError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let port = listener.local_addr()?.port();
        let stats = Arc::new(BridgeStats::default());

        let task = tokio::spawn(relay::run_loopback(
            listener,
            Arc::clone(&stats),
            self.relay.buffer_size,
        ));

        Ok(self.register(
            BridgeKind::Loopback,
            format!("tcp:{}", port),
            Some(port),
            stats,
            task,
        ))
    }

    /// Expose a serial endpoint to TCP clients
    pub async fn start_tcp_serial(
        &mut self,
        endpoint: SerialEndpoint,
        port: u16,
    ) -> Result<u32, HubError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let port = listener.local_addr()?.port();
        let io = endpoint.open(&self.relay)?;
        let stats = Arc::new(BridgeStats::default());

        let task = tokio::spawn(relay::run_tcp_serial(
            listener,
            io,
            Arc::clone(&stats),
            self.relay.buffer_size,
        ));

        Ok(self.register(
            BridgeKind::TcpSerial,
            format!("{} <-> tcp:{}", endpoint, port),
            Some(port),
            stats,
            task,
        ))
    }

    pub fn stop(&mut self, id: u32) -> Result<(), HubError> {
        let bridge = self.bridges.remove(&id).ok_or(HubError::UnknownBridge(id))?;
        bridge.task.abort();
        info!(
            "Bridge {} stopped (rx {} bytes, tx {} bytes)",
            id,
            bridge.stats.rx(),
            bridge.stats.tx()
        );
        Ok(())
    }

    pub fn stop_all(&mut self) {
        let ids: Vec<u32> = self.bridges.keys().copied().collect();
        for id in ids {
            let _ = self.stop(id);
        }
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn stats(&self, id: u32) -> Option<Arc<BridgeStats>> {
        self.bridges.get(&id).map(|b| Arc::clone(&b.stats))
    }

    /// Bound TCP port of a loopback or TCP bridge
    pub fn listen_port(&self, id: u32) -> Option<u16> {
        self.bridges.get(&id).and_then(|b| b.listen_port)
    }

    /// Status table, one header line plus one line per bridge
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "  {:>2} | {:<10} | {:<34} | {:>8} | {:>8}",
            "ID", "Type", "Endpoints", "Rx", "Tx"
        )];
        lines.extend(self.bridges.iter().map(|(id, bridge)| {
            let kind = if bridge.task.is_finished() {
                format!("{}*", bridge.kind)
            } else {
                bridge.kind.to_string()
            };
            format!(
                "  {:>2} | {:<10} | {:<34} | {:>8} | {:>8}",
                id,
                kind,
                bridge.endpoints,
                bridge.stats.rx(),
                bridge.stats.tx()
            )
        }));
        lines
    }
}

impl Drop for BridgeManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
