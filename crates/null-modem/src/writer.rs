//! Cross-Port Writer
//!
//! A write on one port lands in the peer's receive queue and then nudges
//! the peer's parked read. This is the null-modem crossover.

use crate::error::NullModemError;
use crate::port::Port;
use crate::timer::DispatchContext;
use tracing::{debug, trace};

impl Port {
    /// Write `data` into the peer's receive queue
    ///
    /// Returns the number of bytes queued, which is short when the peer's
    /// queue fills up. Never pends. Fails with
    /// [`NullModemError::Disconnected`] when no peer is linked, in which
    /// case nothing is written.
    pub fn write(&self, data: &[u8]) -> Result<usize, NullModemError> {
        if data.is_empty() {
            return Ok(0);
        }

        let peer = self
            .peer()
            .ok_or(NullModemError::Disconnected(self.id()))?;

        let written = peer.rx().push(data);
        self.record_written(written);

        if written < data.len() {
            debug!(
                "Write {} -> {} truncated: {} of {} bytes queued",
                self.id(),
                peer.id(),
                written,
                data.len()
            );
        } else {
            trace!("Wrote {} bytes {} -> {}", written, self.id(), peer.id());
        }

        // Attempted even for a short write; an empty queue makes it a no-op.
        peer.try_complete_read(DispatchContext::enter());

        Ok(written)
    }
}
