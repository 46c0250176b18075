//! Pending Read Requests
//!
//! A read that finds its port's queue empty is parked in the port's
//! [`ReadSlot`] until data arrives, its timer expires or the caller cancels
//! it. Three paths race to finish it; the slot lock together with the
//! request's cancel hook picks exactly one winner:
//!
//! - the producer path and the timer path must take the request out of the
//!   slot *and* disarm the hook (`Armed -> Disarmed`) under the slot lock;
//! - the cancel path first fires the hook (`Armed -> Fired`), then takes the
//!   request out of the slot if it still holds the same request id.
//!
//! Whoever moves the [`PendingRead`] out of the slot owns its `FnOnce`
//! completion, so a second completion cannot be expressed.

use crate::error::status;
use crate::port::Port;
use crate::timer::TimerHandle;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

/// Callback that receives a parked read's terminal result
pub type CompletionFn = Box<dyn FnOnce(ReadCompletion) + Send + 'static>;

/// Terminal status of a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Data (possibly zero bytes, on timeout) was delivered
    Success,
    /// The request was cancelled before any data was delivered
    Cancelled,
}

/// Which path finished a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    /// Satisfied inside the read call itself
    Immediate,
    /// Satisfied by a write from the peer
    Data,
    /// Expiration timer fired
    Timeout,
    /// Cancel signal or handle cleanup
    Cancel,
}

/// Result delivered for a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCompletion {
    pub status: ReadStatus,
    pub source: CompletionSource,
    /// Bytes transferred; its length is the byte count
    pub data: Vec<u8>,
}

impl ReadCompletion {
    pub(crate) fn success(data: Vec<u8>, source: CompletionSource) -> Self {
        Self {
            status: ReadStatus::Success,
            source,
            data,
        }
    }

    pub(crate) fn cancelled(mut data: Vec<u8>) -> Self {
        data.clear();
        Self {
            status: ReadStatus::Cancelled,
            source: CompletionSource::Cancel,
            data,
        }
    }

    /// Number of bytes delivered to the caller
    pub fn bytes_transferred(&self) -> usize {
        self.data.len()
    }

    /// A timed-out read: success with nothing transferred
    pub fn is_timeout(&self) -> bool {
        self.source == CompletionSource::Timeout
    }

    /// NT status for the completion
    pub fn status_code(&self) -> u32 {
        match self.status {
            ReadStatus::Success => status::STATUS_SUCCESS,
            ReadStatus::Cancelled => status::STATUS_CANCELLED,
        }
    }
}

/// Outcome of submitting a read
///
/// `Ready` means the request finished inside the call and its completion
/// callback was dropped without being invoked. `Pending` means the callback
/// will be invoked exactly once from whichever path wins, possibly before
/// the submitting call has returned.
#[derive(Debug)]
pub enum ReadPoll {
    Ready(ReadCompletion),
    Pending,
}

impl ReadPoll {
    pub fn is_pending(&self) -> bool {
        matches!(self, ReadPoll::Pending)
    }

    /// NT status returned to the submitter
    pub fn status_code(&self) -> u32 {
        match self {
            ReadPoll::Ready(completion) => completion.status_code(),
            ReadPoll::Pending => status::STATUS_PENDING,
        }
    }
}

const HOOK_UNARMED: u8 = 0;
const HOOK_ARMED: u8 = 1;
const HOOK_DISARMED: u8 = 2;
const HOOK_FIRED: u8 = 3;

/// Cancellation hook shared by a request and its [`CancelHandle`]
///
/// `Unarmed -> Armed` when the read pends, `Armed -> Disarmed` when the
/// producer or timer claims it, and `Unarmed | Armed -> Fired` when the
/// caller cancels. `Disarmed` and `Fired` are terminal.
pub(crate) struct CancelHook {
    state: AtomicU8,
    /// Port and request id the hook routes to once armed
    target: OnceLock<(Weak<Port>, u64)>,
}

impl CancelHook {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(HOOK_UNARMED),
            target: OnceLock::new(),
        }
    }

    /// Register the hook for a parked request
    ///
    /// Fails if cancellation was requested before the read could park.
    pub(crate) fn arm(&self, port: Weak<Port>, request_id: u64) -> bool {
        // Target is published before the state flips, so a canceller that
        // observes `Armed` always finds it.
        let _ = self.target.set((port, request_id));
        self.state
            .compare_exchange(HOOK_UNARMED, HOOK_ARMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Take the hook away from the canceller
    ///
    /// Fails if the hook already fired; the cancel path then owns completion.
    pub(crate) fn disarm(&self) -> bool {
        self.state
            .compare_exchange(HOOK_ARMED, HOOK_DISARMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Fire the hook; returns the routing target if the request is parked
    fn fire(&self) -> Option<(Weak<Port>, u64)> {
        let prev = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| match state {
                HOOK_UNARMED | HOOK_ARMED => Some(HOOK_FIRED),
                _ => None,
            });

        match prev {
            Ok(HOOK_ARMED) => self.target.get().cloned(),
            _ => None,
        }
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == HOOK_FIRED
    }
}

/// Caller-side cancellation signal for a read
#[derive(Clone)]
pub struct CancelHandle {
    hook: Arc<CancelHook>,
}

impl CancelHandle {
    /// Request cancellation
    ///
    /// Safe to call at any point: before the read is submitted, while it is
    /// parked, or after it finished (a no-op then).
    pub fn cancel(&self) {
        if let Some((port, request_id)) = self.hook.fire() {
            if let Some(port) = port.upgrade() {
                port.cancel_parked_read(request_id);
            }
        }
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.hook.is_fired()
    }

    /// Cancel automatically when the returned guard is dropped
    pub fn cancel_on_drop(self) -> CancelGuard {
        CancelGuard(self)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancels its read when dropped
#[derive(Debug)]
pub struct CancelGuard(CancelHandle);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// A read submission: destination buffer plus completion callback
pub struct ReadRequest {
    /// Destination, pre-sized to the requested length
    pub(crate) buffer: Vec<u8>,
    pub(crate) on_complete: CompletionFn,
    pub(crate) hook: Arc<CancelHook>,
}

impl ReadRequest {
    /// Build a request for up to `length` bytes
    ///
    /// The destination is allocated here so that completion paths only copy
    /// into memory that already exists.
    pub fn new<F>(length: usize, on_complete: F) -> (Self, CancelHandle)
    where
        F: FnOnce(ReadCompletion) + Send + 'static,
    {
        let hook = Arc::new(CancelHook::new());
        let request = Self {
            buffer: vec![0u8; length],
            on_complete: Box::new(on_complete),
            hook: Arc::clone(&hook),
        };
        (request, CancelHandle { hook })
    }

    /// Requested length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl fmt::Debug for ReadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadRequest")
            .field("len", &self.buffer.len())
            .finish()
    }
}

/// A request parked in a port's slot
pub(crate) struct PendingRead {
    pub(crate) id: u64,
    pub(crate) buffer: Vec<u8>,
    pub(crate) on_complete: CompletionFn,
    pub(crate) hook: Arc<CancelHook>,
    pub(crate) timer: TimerHandle,
}

impl PendingRead {
    /// Deliver the terminal result; never call with a slot lock held
    pub(crate) fn complete(self, completion: impl FnOnce(Vec<u8>) -> ReadCompletion) {
        self.timer.cancel();
        (self.on_complete)(completion(self.buffer));
    }
}

/// A port's single outstanding-read slot
pub(crate) struct ReadSlot {
    slot: Mutex<Option<PendingRead>>,
    next_id: AtomicU64,
}

impl ReadSlot {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<PendingRead>> {
        // Slot updates are single assignments; a poisoned guard is consistent.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Detach the parked request for the producer, timer or cleanup path
///
/// `request_id` restricts the claim to one specific request. Leaves the slot
/// untouched when it is empty, holds another request, or the cancel hook has
/// already fired.
pub(crate) fn claim(slot: &mut Option<PendingRead>, request_id: Option<u64>) -> Option<PendingRead> {
    let parked = slot.as_ref()?;
    if request_id.is_some_and(|id| id != parked.id) {
        return None;
    }
    if !parked.hook.disarm() {
        return None;
    }
    slot.take()
}

/// Detach the parked request for the cancel path, whose hook already fired
pub(crate) fn claim_cancelled(slot: &mut Option<PendingRead>, request_id: u64) -> Option<PendingRead> {
    if slot.as_ref().is_some_and(|parked| parked.id == request_id) {
        slot.take()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_cancel_before_arm() {
        let hook = CancelHook::new();
        assert!(hook.fire().is_none());
        assert!(hook.is_fired());
        // The read must back out instead of parking
        assert!(!hook.arm(Weak::new(), 1));
    }

    #[test]
    fn test_hook_disarm_blocks_cancel() {
        let hook = CancelHook::new();
        assert!(hook.arm(Weak::new(), 7));
        assert!(hook.disarm());
        assert!(hook.fire().is_none());
        assert!(!hook.is_fired());
    }

    #[test]
    fn test_hook_fire_blocks_disarm() {
        let hook = CancelHook::new();
        assert!(hook.arm(Weak::new(), 7));
        let target = hook.fire();
        assert_eq!(target.map(|(_, id)| id), Some(7));
        assert!(!hook.disarm());
        // Second cancel is a no-op
        assert!(hook.fire().is_none());
    }

    #[test]
    fn test_request_preallocates_buffer() {
        let (request, cancel) = ReadRequest::new(16, |_| {});
        assert_eq!(request.len(), 16);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_cancel_before_submit_marks_handle() {
        let (_request, cancel) = ReadRequest::new(4, |_| {});
        cancel.cancel();
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_completion_accessors() {
        let completion = ReadCompletion::success(b"abc".to_vec(), CompletionSource::Data);
        assert_eq!(completion.bytes_transferred(), 3);
        assert_eq!(completion.status_code(), status::STATUS_SUCCESS);

        let cancelled = ReadCompletion::cancelled(vec![0u8; 8]);
        assert_eq!(cancelled.bytes_transferred(), 0);
        assert_eq!(cancelled.status_code(), status::STATUS_CANCELLED);
    }
}
