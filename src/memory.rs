/// Allocator boundary for the merge tree arena
///
/// The arena requests byte ranges through [`BufferAllocator`] so the host
/// runtime can plug in its own budgeting. Exhaustion is signaled as a
/// recoverable condition (`None`), never as a process-fatal error.
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// Hands out zero-initialized buffers against some budget.
pub trait BufferAllocator: Send + Sync {
    /// Allocate a zero-initialized buffer of `bytes`, or `None` when the
    /// budget is exhausted.
    fn allocate(&self, bytes: usize) -> Option<Vec<u8>>;

    /// Return `bytes` to the budget after the matching buffer was dropped.
    fn release(&self, bytes: usize);
}

/// Byte budget scoped to one operator instance.
pub struct MemoryPool {
    limit: usize,
    used: AtomicUsize,
}

impl MemoryPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// A pool that never denies an allocation.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used_bytes(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }
}

impl BufferAllocator for MemoryPool {
    fn allocate(&self, bytes: usize) -> Option<Vec<u8>> {
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            let new_used = used.checked_add(bytes)?;
            if new_used > self.limit {
                warn!(
                    requested = bytes,
                    used,
                    limit = self.limit,
                    "allocation denied, memory budget exhausted"
                );
                return None;
            }
            match self
                .used
                .compare_exchange_weak(used, new_used, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => used = current,
            }
        }
        Some(vec![0u8; bytes])
    }

    fn release(&self, bytes: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}
