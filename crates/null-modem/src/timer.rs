//! Read expiration timers

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::trace;

/// Marker for code running on a completion path
///
/// Functions taking a `DispatchContext` run from timer callbacks or from a
/// peer's write. They must not block, must not wait on anything held across
/// I/O, and only touch storage allocated before the read parked.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext {
    _private: (),
}

impl DispatchContext {
    pub(crate) fn enter() -> Self {
        Self { _private: () }
    }
}

/// Armed expiration timer for one parked read
#[derive(Debug)]
pub(crate) struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Arm a one-shot timer that runs `on_fire` after `after`
    pub(crate) fn arm<F>(runtime: &Handle, after: Duration, on_fire: F) -> Self
    where
        F: FnOnce(DispatchContext) + Send + 'static,
    {
        trace!("Arming read timer for {:?}", after);
        let task = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            on_fire(DispatchContext::enter());
        });
        Self {
            abort: task.abort_handle(),
        }
    }

    /// Disarm the timer
    ///
    /// A callback that already started still runs; it must tolerate finding
    /// its request gone.
    pub(crate) fn cancel(&self) {
        self.abort.abort();
    }
}
