//! Pending-Read State Machine
//!
//! Transitions for a port's read slot:
//!
//! | from    | event                  | to        | delivered             |
//! |---------|------------------------|-----------|-----------------------|
//! | Idle    | read, data queued      | Completed | bytes, immediately    |
//! | Idle    | read, queue empty      | Pending   | nothing yet           |
//! | Pending | peer write             | Completed | bytes                 |
//! | Pending | timer expiry           | Completed | success, zero bytes   |
//! | Pending | cancel / cleanup       | Cancelled | cancelled, zero bytes |
//!
//! The slot lock and the ring lock are never held together.

use crate::error::NullModemError;
use crate::pending::{
    claim, claim_cancelled, CompletionSource, PendingRead, ReadCompletion, ReadPoll, ReadRequest,
};
use crate::port::Port;
use crate::timer::{DispatchContext, TimerHandle};
use std::sync::Arc;
use tracing::{debug, trace, warn};

impl Port {
    /// Submit a read
    ///
    /// Returns [`ReadPoll::Ready`] when the request finished in the call
    /// (data was queued, zero bytes were requested, or cancellation was
    /// already requested) and [`ReadPoll::Pending`] when it was parked.
    /// A second read while one is parked fails with
    /// [`NullModemError::Busy`] and leaves the parked read untouched.
    pub fn read(self: &Arc<Self>, request: ReadRequest) -> Result<ReadPoll, NullModemError> {
        let ReadRequest {
            mut buffer,
            on_complete,
            hook,
        } = request;

        if buffer.is_empty() {
            return Ok(ReadPoll::Ready(ReadCompletion::success(
                buffer,
                CompletionSource::Immediate,
            )));
        }

        let n = self.rx().pop(&mut buffer);
        if n > 0 {
            self.record_read(n);
            buffer.truncate(n);
            trace!("Read {} bytes from {} immediately", n, self.id());
            return Ok(ReadPoll::Ready(ReadCompletion::success(
                buffer,
                CompletionSource::Immediate,
            )));
        }

        let timeout = self.read_timeout();
        {
            let mut slot = self.reader.lock();
            if slot.is_some() {
                warn!("Rejecting read on {}: another read is pending", self.id());
                return Err(NullModemError::Busy(self.id()));
            }

            let request_id = self.reader.next_id();
            if !hook.arm(Arc::downgrade(self), request_id) {
                debug!("Read on {} cancelled before it could pend", self.id());
                return Ok(ReadPoll::Ready(ReadCompletion::cancelled(buffer)));
            }

            let port = Arc::downgrade(self);
            let timer = TimerHandle::arm(&self.runtime, timeout, move |ctx| {
                if let Some(port) = port.upgrade() {
                    port.expire_read(request_id, ctx);
                }
            });

            *slot = Some(PendingRead {
                id: request_id,
                buffer,
                on_complete,
                hook,
                timer,
            });
        }

        metrics::counter!("vserial_reads_pended_total", "port" => self.id().label()).increment(1);
        debug!("Read on {} pending (timeout {:?})", self.id(), timeout);

        // Data that landed between the empty pop and parking would
        // otherwise wait out the whole timeout.
        self.try_complete_read(DispatchContext::enter());

        Ok(ReadPoll::Pending)
    }

    /// Producer-triggered completion attempt
    ///
    /// Called after every push into this port's queue. A no-op when no read
    /// is parked, the queue is empty, or the parked read is being cancelled.
    pub(crate) fn try_complete_read(&self, _ctx: DispatchContext) {
        if self.rx().available() == 0 {
            return;
        }

        let Some(pending) = claim(&mut self.reader.lock(), None) else {
            return;
        };

        pending.complete(|mut buffer| {
            let n = self.rx().pop(&mut buffer);
            buffer.truncate(n);
            self.record_read(n);
            trace!("Completed pending read on {} with {} bytes", self.id(), n);
            ReadCompletion::success(buffer, CompletionSource::Data)
        });
    }

    /// Timer path: finish the read as a zero-byte success
    pub(crate) fn expire_read(&self, request_id: u64, _ctx: DispatchContext) {
        let Some(pending) = claim(&mut self.reader.lock(), Some(request_id)) else {
            return;
        };

        metrics::counter!("vserial_reads_timed_out_total", "port" => self.id().label())
            .increment(1);
        debug!("Read on {} timed out", self.id());

        pending.complete(|mut buffer| {
            buffer.clear();
            ReadCompletion::success(buffer, CompletionSource::Timeout)
        });
    }

    /// Cancel path, entered after the request's hook fired
    pub(crate) fn cancel_parked_read(&self, request_id: u64) {
        let Some(pending) = claim_cancelled(&mut self.reader.lock(), request_id) else {
            return;
        };

        metrics::counter!("vserial_reads_cancelled_total", "port" => self.id().label())
            .increment(1);
        debug!("Read on {} cancelled", self.id());

        pending.complete(ReadCompletion::cancelled);
    }

    /// Handle-release path: cancel whatever read is parked
    ///
    /// Returns `true` if this call completed a read. A read whose own cancel
    /// signal is already in flight is left to that signal.
    pub fn cleanup(&self) -> bool {
        let Some(pending) = claim(&mut self.reader.lock(), None) else {
            return false;
        };

        metrics::counter!("vserial_reads_cancelled_total", "port" => self.id().label())
            .increment(1);
        debug!("Cleanup cancelled pending read on {}", self.id());

        pending.complete(ReadCompletion::cancelled);
        true
    }

    /// Whether a read is parked on this port
    pub fn has_pending_read(&self) -> bool {
        self.reader.lock().is_some()
    }
}
