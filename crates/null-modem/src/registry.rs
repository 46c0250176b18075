//! Pair Lifecycle
//!
//! [`PortRegistry`] owns the two ports and tears them down; [`NullModem`]
//! is the loaded device: both ports created, linked, and ready for I/O.

use crate::config::PairConfig;
use crate::error::NullModemError;
use crate::modem::ModemStatus;
use crate::pending::{ReadCompletion, ReadPoll, ReadRequest};
use crate::port::{Port, PortId, PortStats};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Owner of the port table
///
/// Ports hold only weak references to each other; the registry holds the
/// strong ones. Dropping the registry cancels any parked reads.
#[derive(Debug)]
pub struct PortRegistry {
    config: PairConfig,
    runtime: Handle,
    ports: [Option<Arc<Port>>; 2],
}

impl PortRegistry {
    pub fn new(config: PairConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            ports: [None, None],
        }
    }

    /// Create a port, or return the existing one with that id
    pub fn create_port(&mut self, id: PortId) -> Result<Arc<Port>, NullModemError> {
        if let Some(port) = &self.ports[id.index()] {
            return Ok(Arc::clone(port));
        }

        let port = Port::new(id, &self.config, self.runtime.clone())?;
        self.ports[id.index()] = Some(Arc::clone(&port));
        Ok(port)
    }

    /// Cross-wire the two ports
    ///
    /// Both must exist. Links are set once; linking an already linked pair
    /// is a no-op.
    pub fn link(&self) -> Result<(), NullModemError> {
        let a = self.port(PortId::A)?;
        let b = self.port(PortId::B)?;

        a.link(&b);
        b.link(&a);
        info!("Linked {} <-> {}", a.id(), b.id());
        Ok(())
    }

    pub fn get(&self, id: PortId) -> Option<&Arc<Port>> {
        self.ports[id.index()].as_ref()
    }

    /// Like [`get`](Self::get) but fails with [`NullModemError::PortUnavailable`]
    pub fn port(&self, id: PortId) -> Result<Arc<Port>, NullModemError> {
        self.get(id)
            .cloned()
            .ok_or(NullModemError::PortUnavailable(id))
    }

    /// Cancel the port's parked read and drop it from the table
    pub fn destroy_port(&mut self, id: PortId) -> bool {
        let Some(port) = self.ports[id.index()].take() else {
            return false;
        };

        port.cleanup();
        info!("Destroyed port {}", id);
        true
    }

    pub fn config(&self) -> &PairConfig {
        &self.config
    }
}

impl Drop for PortRegistry {
    fn drop(&mut self) {
        for id in PortId::ALL {
            self.destroy_port(id);
        }
    }
}

/// A loaded virtual null-modem pair
#[derive(Debug)]
pub struct NullModem {
    registry: PortRegistry,
}

impl NullModem {
    /// Load on the current Tokio runtime
    pub fn load(config: PairConfig) -> Result<Self, NullModemError> {
        let runtime = Handle::try_current().map_err(|_| NullModemError::NoRuntime)?;
        Self::load_with_runtime(config, runtime)
    }

    /// Create both ports and link them
    ///
    /// If the second port cannot be created the first is destroyed again,
    /// so a failed load leaves nothing behind.
    pub fn load_with_runtime(config: PairConfig, runtime: Handle) -> Result<Self, NullModemError> {
        info!(
            "Loading null-modem pair ({} byte queues, {} ms default read timeout)",
            config.buffer_capacity, config.default_read_timeout_ms
        );

        let mut registry = PortRegistry::new(config, runtime);
        for id in PortId::ALL {
            if let Err(e) = registry.create_port(id) {
                error!("Failed to create port {}: {}", id, e);
                // Registry drop destroys whatever was created.
                return Err(e);
            }
        }
        registry.link()?;

        Ok(Self { registry })
    }

    pub fn port(&self, id: PortId) -> Result<Arc<Port>, NullModemError> {
        self.registry.port(id)
    }

    pub fn config(&self) -> &PairConfig {
        self.registry.config()
    }

    /// Handle open; no state changes
    pub fn open(&self, id: PortId) -> Result<(), NullModemError> {
        self.port(id)?;
        info!("Opened {}", id);
        Ok(())
    }

    /// Handle close; no state changes
    pub fn close(&self, id: PortId) -> Result<(), NullModemError> {
        self.port(id)?;
        info!("Closed {}", id);
        Ok(())
    }

    /// Handle release: cancel the port's parked read, if any
    pub fn cleanup(&self, id: PortId) -> Result<bool, NullModemError> {
        Ok(self.port(id)?.cleanup())
    }

    pub fn read(&self, id: PortId, request: ReadRequest) -> Result<ReadPoll, NullModemError> {
        self.port(id)?.read(request)
    }

    pub fn write(&self, id: PortId, data: &[u8]) -> Result<usize, NullModemError> {
        self.port(id)?.write(data)
    }

    pub fn device_control(
        &self,
        id: PortId,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, NullModemError> {
        self.port(id)?.device_control(code, input, output)
    }

    pub fn modem_status(&self, id: PortId) -> Result<ModemStatus, NullModemError> {
        Ok(self.port(id)?.modem_status())
    }

    pub fn stats(&self, id: PortId) -> Result<PortStats, NullModemError> {
        Ok(self.port(id)?.stats())
    }

    /// Read up to `length` bytes, waiting for data or the port's timeout
    ///
    /// Dropping the returned future cancels the parked read.
    pub async fn read_async(
        &self,
        id: PortId,
        length: usize,
    ) -> Result<ReadCompletion, NullModemError> {
        let port = self.port(id)?;
        let (tx, rx) = oneshot::channel();
        let (request, handle) = ReadRequest::new(length, move |completion| {
            let _ = tx.send(completion);
        });
        let _guard = handle.cancel_on_drop();

        match port.read(request)? {
            ReadPoll::Ready(completion) => Ok(completion),
            // The sender only goes away unsent if the port is torn down.
            ReadPoll::Pending => rx.await.map_err(|_| NullModemError::PortUnavailable(id)),
        }
    }

    /// Tear the pair down, cancelling parked reads
    pub fn unload(mut self) {
        for id in PortId::ALL {
            self.registry.destroy_port(id);
        }
        debug!("Null-modem pair unloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::{CompletionSource, ReadStatus};
    use std::sync::Mutex;
    use std::time::Duration;

    fn capture() -> (Arc<Mutex<Vec<ReadCompletion>>>, impl FnOnce(ReadCompletion) + Send + 'static) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        (results, move |c| sink.lock().unwrap().push(c))
    }

    #[tokio::test]
    async fn test_load_links_both_ports() {
        let modem = NullModem::load(PairConfig::default()).unwrap();
        let a = modem.port(PortId::A).unwrap();
        let b = modem.port(PortId::B).unwrap();

        assert_eq!(a.peer().map(|p| p.id()), Some(PortId::B));
        assert_eq!(b.peer().map(|p| p.id()), Some(PortId::A));
        modem.open(PortId::A).unwrap();
        modem.close(PortId::A).unwrap();
    }

    #[test]
    fn test_load_without_runtime_fails() {
        let err = NullModem::load(PairConfig::default()).unwrap_err();
        assert_eq!(err, NullModemError::NoRuntime);
    }

    #[tokio::test]
    async fn test_load_failure_leaves_nothing_behind() {
        let config = PairConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        let err = NullModem::load(config).unwrap_err();
        assert!(matches!(err, NullModemError::InsufficientResources(_)));
    }

    #[tokio::test]
    async fn test_pending_read_completed_by_peer_write() {
        let modem = NullModem::load(PairConfig::default()).unwrap();
        let (results, on_complete) = capture();
        let (request, _handle) = ReadRequest::new(16, on_complete);

        assert!(modem.read(PortId::A, request).unwrap().is_pending());
        assert_eq!(modem.write(PortId::B, b"hello").unwrap(), 5);

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ReadStatus::Success);
        assert_eq!(results[0].source, CompletionSource::Data);
        assert_eq!(results[0].data, b"hello");
    }

    #[tokio::test]
    async fn test_oversized_write_truncates_and_preserves_order() {
        let modem = NullModem::load(PairConfig::default()).unwrap();
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

        assert_eq!(modem.write(PortId::B, &payload).unwrap(), 4096);

        let completion = modem.read_async(PortId::A, 8192).await.unwrap();
        assert_eq!(completion.source, CompletionSource::Immediate);
        assert_eq!(completion.data, &payload[..4096]);
        assert_eq!(modem.stats(PortId::B).unwrap().bytes_written, 4096);
        assert_eq!(modem.stats(PortId::A).unwrap().bytes_read, 4096);
    }

    #[tokio::test]
    async fn test_unlinked_write_is_disconnected() {
        let mut registry = PortRegistry::new(PairConfig::default(), Handle::current());
        let a = registry.create_port(PortId::A).unwrap();
        let b = registry.create_port(PortId::B).unwrap();

        assert_eq!(a.write(b"data"), Err(NullModemError::Disconnected(PortId::A)));
        assert_eq!(b.rx().available(), 0);
        assert_eq!(a.stats().bytes_written, 0);
    }

    #[tokio::test]
    async fn test_zero_length_write_is_noop() {
        let modem = NullModem::load(PairConfig::default()).unwrap();
        let (results, on_complete) = capture();
        let (request, _handle) = ReadRequest::new(8, on_complete);
        assert!(modem.read(PortId::A, request).unwrap().is_pending());

        assert_eq!(modem.write(PortId::B, b""), Ok(0));
        assert!(modem.port(PortId::A).unwrap().has_pending_read());
        assert!(results.lock().unwrap().is_empty());
        assert_eq!(modem.stats(PortId::B).unwrap().bytes_written, 0);

        // Length is checked before the peer link
        let mut registry = PortRegistry::new(PairConfig::default(), Handle::current());
        let lone = registry.create_port(PortId::A).unwrap();
        assert_eq!(lone.write(b""), Ok(0));
    }

    #[tokio::test]
    async fn test_modem_status_without_peer_is_empty() {
        let mut registry = PortRegistry::new(PairConfig::default(), Handle::current());
        let a = registry.create_port(PortId::A).unwrap();
        let b = registry.create_port(PortId::B).unwrap();
        b.update_config(|c| {
            c.dtr = true;
            c.rts = true;
        });

        assert!(a.modem_status().is_empty());

        registry.link().unwrap();
        assert_eq!(
            a.modem_status(),
            ModemStatus::CTS | ModemStatus::DSR | ModemStatus::DCD
        );
    }

    #[tokio::test]
    async fn test_link_requires_both_ports() {
        let mut registry = PortRegistry::new(PairConfig::default(), Handle::current());
        registry.create_port(PortId::A).unwrap();
        assert_eq!(
            registry.link(),
            Err(NullModemError::PortUnavailable(PortId::B))
        );
    }

    #[tokio::test]
    async fn test_modem_status_mirrors_peer_outputs() {
        let modem = NullModem::load(PairConfig::default()).unwrap();
        modem.port(PortId::B).unwrap().update_config(|c| {
            c.dtr = true;
            c.rts = false;
        });

        let status = modem.modem_status(PortId::A).unwrap();
        assert_eq!(status, ModemStatus::DCD | ModemStatus::DSR);
        assert!(!status.contains(ModemStatus::CTS));
    }

    #[tokio::test]
    async fn test_second_read_is_busy() {
        let modem = NullModem::load(PairConfig::default()).unwrap();
        let (first, on_first) = capture();
        let (second, on_second) = capture();
        let (r1, _h1) = ReadRequest::new(8, on_first);
        let (r2, _h2) = ReadRequest::new(8, on_second);

        assert!(modem.read(PortId::A, r1).unwrap().is_pending());
        assert_eq!(modem.read(PortId::A, r2).unwrap_err(), NullModemError::Busy(PortId::A));

        modem.write(PortId::B, b"x").unwrap();
        assert_eq!(first.lock().unwrap()[0].data, b"x");
        assert!(second.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_async_times_out_with_zero_bytes() {
        let modem = NullModem::load(PairConfig::default()).unwrap();
        modem.port(PortId::A).unwrap().update_config(|c| {
            c.timeouts.read_total_constant = 200;
        });

        let completion = modem.read_async(PortId::A, 16).await.unwrap();
        assert_eq!(completion.status, ReadStatus::Success);
        assert!(completion.is_timeout());
        assert_eq!(completion.bytes_transferred(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_read_future_cancels() {
        let modem = NullModem::load(PairConfig::default()).unwrap();
        let read = modem.read_async(PortId::A, 16);
        let outcome = tokio::time::timeout(Duration::from_millis(10), read).await;

        assert!(outcome.is_err());
        assert!(!modem.port(PortId::A).unwrap().has_pending_read());
    }

    #[tokio::test]
    async fn test_unload_cancels_parked_read() {
        let modem = NullModem::load(PairConfig::default()).unwrap();
        let (results, on_complete) = capture();
        let (request, _handle) = ReadRequest::new(8, on_complete);
        modem.read(PortId::B, request).unwrap();

        modem.unload();

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ReadStatus::Cancelled);
    }
}
