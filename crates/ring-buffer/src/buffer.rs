//! Lock-Protected Byte Ring Implementation

use crate::RingError;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Default buffer capacity (4 KiB per port receive queue)
pub const DEFAULT_CAPACITY: usize = 4096;

/// Cursor state guarded by the ring lock
struct RingState {
    /// Pre-allocated storage
    storage: Box<[u8]>,
    /// Head position (write cursor)
    head: usize,
    /// Tail position (read cursor)
    tail: usize,
    /// Bytes currently queued
    count: usize,
}

/// Fixed-capacity circular byte queue
///
/// Every operation takes the internal lock for its full duration and never
/// calls out while holding it, so callers may hold their own locks around a
/// push or pop without creating an ordering cycle.
pub struct ByteRing {
    /// Storage and cursors
    state: Mutex<RingState>,
    /// Capacity of the buffer
    capacity: usize,
}

impl ByteRing {
    /// Create a new ring buffer with given capacity
    ///
    /// Storage is reserved fallibly so that exhaustion surfaces as
    /// [`RingError::AllocationFailed`] instead of aborting.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| RingError::AllocationFailed { capacity })?;
        storage.resize(capacity, 0u8);

        Ok(Self {
            state: Mutex::new(RingState {
                storage: storage.into_boxed_slice(),
                head: 0,
                tail: 0,
                count: 0,
            }),
            capacity,
        })
    }

    /// Create a buffer with default capacity (4096 bytes)
    pub fn with_default_capacity() -> Result<Self, RingError> {
        Self::new(DEFAULT_CAPACITY)
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        // Cursor updates complete before any panic point, so a poisoned
        // guard still holds consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy as much of `data` as fits into the ring
    ///
    /// Returns the number of bytes queued, which is less than `data.len()`
    /// when the ring runs out of room.
    pub fn push(&self, data: &[u8]) -> usize {
        let mut guard = self.lock();
        let ring = &mut *guard;
        let mut written = 0;

        while written < data.len() && ring.count < self.capacity {
            let chunk = (data.len() - written)
                .min(self.capacity - ring.count)
                .min(self.capacity - ring.head);

            ring.storage[ring.head..ring.head + chunk]
                .copy_from_slice(&data[written..written + chunk]);

            ring.head = (ring.head + chunk) % self.capacity;
            ring.count += chunk;
            written += chunk;
        }

        written
    }

    /// Move up to `dest.len()` queued bytes into `dest`
    ///
    /// Returns the number of bytes copied (0 if the ring is empty).
    pub fn pop(&self, dest: &mut [u8]) -> usize {
        let mut guard = self.lock();
        let ring = &mut *guard;
        let mut read = 0;

        while read < dest.len() && ring.count > 0 {
            let chunk = (dest.len() - read)
                .min(ring.count)
                .min(self.capacity - ring.tail);

            dest[read..read + chunk].copy_from_slice(&ring.storage[ring.tail..ring.tail + chunk]);

            ring.tail = (ring.tail + chunk) % self.capacity;
            ring.count -= chunk;
            read += chunk;
        }

        read
    }

    /// Get the number of bytes currently queued
    pub fn available(&self) -> usize {
        self.lock().count
    }

    /// Get the number of bytes that can still be pushed
    pub fn remaining(&self) -> usize {
        self.capacity - self.available()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.available() == self.capacity
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard all queued bytes
    pub fn reset(&self) {
        let mut ring = self.lock();
        trace!("Discarding {} queued bytes", ring.count);
        ring.head = 0;
        ring.tail = 0;
        ring.count = 0;
    }
}

impl std::fmt::Debug for ByteRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteRing")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}
