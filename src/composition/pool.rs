//! Bounded pool of composed-frame pixel buffers
//!
//! Buffers are leased out as [`PooledBuffer`] and return to the pool when the
//! lease is dropped (typically by a writer thread once the frame is encoded).
//! When every buffer is leased, `acquire` returns `None` instead of allocating.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

struct PoolState {
    free: Vec<Vec<u8>>,
    /// Buffers alive, free or leased
    allocated: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    capacity: usize,
    buffer_len: usize,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-capacity buffer pool, owned by the composition engine
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    free: Vec::with_capacity(capacity),
                    allocated: 0,
                }),
                capacity: capacity.max(1),
                buffer_len,
            }),
        }
    }

    /// Lease a buffer; `None` when the pool is exhausted
    pub fn acquire(&self) -> Option<PooledBuffer> {
        let mut state = self.shared.lock();
        let data = match state.free.pop() {
            Some(buffer) => buffer,
            None if state.allocated < self.shared.capacity => {
                state.allocated += 1;
                vec![0u8; self.shared.buffer_len]
            }
            None => return None,
        };
        Some(PooledBuffer {
            data,
            home: Arc::downgrade(&self.shared),
        })
    }

    /// Release idle buffers; leased buffers are unaffected
    pub fn trim(&self) -> usize {
        let mut state = self.shared.lock();
        let released = state.free.len();
        state.free.clear();
        state.allocated -= released;
        released
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn buffer_len(&self) -> usize {
        self.shared.buffer_len
    }

    pub fn idle(&self) -> usize {
        self.shared.lock().free.len()
    }

    pub fn leased(&self) -> usize {
        let state = self.shared.lock();
        state.allocated - state.free.len()
    }
}

/// A pixel buffer on loan from a [`BufferPool`]
pub struct PooledBuffer {
    data: Vec<u8>,
    home: Weak<PoolShared>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(shared) = self.home.upgrade() else {
            return;
        };
        let mut state = shared.lock();
        if self.data.len() == shared.buffer_len && state.free.len() < shared.capacity {
            state.free.push(std::mem::take(&mut self.data));
        } else {
            state.allocated = state.allocated.saturating_sub(1);
        }
    }
}
