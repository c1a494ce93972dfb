/// Growable memory arena backing the merge tree nodes
///
/// A single contiguous, zero-initialized byte region that exclusively owns
/// all node storage. Nodes are addressed by integer index, never by
/// reference, so the tree carries no ownership cycles and a released arena
/// can fail closed instead of touching freed memory.
use crate::error::{EngineError, EngineResult};
use crate::memory::BufferAllocator;
use crate::sort::splay::NODE_SIZE;
use std::sync::Arc;
use tracing::debug;

pub struct NodeArena {
    allocator: Arc<dyn BufferAllocator>,
    buf: Vec<u8>,
    capacity_nodes: usize,
    initial_nodes: usize,
    released: bool,
}

impl NodeArena {
    /// Create an empty arena. The first `ensure_capacity` call performs the
    /// initial allocation of `initial_nodes` slots.
    pub fn new(allocator: Arc<dyn BufferAllocator>, initial_nodes: usize) -> Self {
        Self {
            allocator,
            buf: Vec::new(),
            capacity_nodes: 0,
            initial_nodes: initial_nodes.max(1),
            released: false,
        }
    }

    /// Guarantee room for at least `required_nodes` node slots.
    ///
    /// Doubles the capacity until it suffices: the new region is allocated,
    /// every old byte is copied to the same offset, the tail is zero-filled
    /// by the allocator, and only then is the old region released. Returns
    /// `false` when the allocator denies the request; the old region stays
    /// fully valid in that case. A released arena always reports `false`.
    pub fn ensure_capacity(&mut self, required_nodes: usize) -> bool {
        if self.released {
            return false;
        }
        if self.capacity_nodes >= required_nodes {
            return true;
        }

        let mut new_nodes = if self.capacity_nodes == 0 {
            self.initial_nodes
        } else {
            self.capacity_nodes * 2
        };
        while new_nodes < required_nodes {
            new_nodes *= 2;
        }

        let new_bytes = new_nodes * NODE_SIZE;
        let mut new_buf = match self.allocator.allocate(new_bytes) {
            Some(buf) => buf,
            None => return false,
        };
        new_buf[..self.buf.len()].copy_from_slice(&self.buf);

        let old_bytes = self.buf.len();
        self.buf = new_buf;
        self.capacity_nodes = new_nodes;
        if old_bytes > 0 {
            self.allocator.release(old_bytes);
        }
        debug!(
            nodes = new_nodes,
            bytes = new_bytes,
            "grew merge tree arena"
        );
        true
    }

    /// Capacity in node slots.
    pub fn capacity_nodes(&self) -> usize {
        self.capacity_nodes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.buf.len()
    }

    /// The backing storage. Fails closed once the arena has been released.
    pub fn raw_view(&self) -> EngineResult<&[u8]> {
        if self.released {
            return Err(EngineError::internal(
                "arena accessed after release",
            ));
        }
        Ok(&self.buf)
    }

    #[inline]
    pub(crate) fn read_u32(&self, node: u32, field_offset: usize) -> u32 {
        let offset = node as usize * NODE_SIZE + field_offset;
        debug_assert!(offset + 4 <= self.buf.len());
        let bytes = &self.buf[offset..offset + 4];
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline]
    pub(crate) fn write_u32(&mut self, node: u32, field_offset: usize, value: u32) {
        let offset = node as usize * NODE_SIZE + field_offset;
        debug_assert!(offset + 4 <= self.buf.len());
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Zero the used prefix so the slots read as empty again. Capacity is
    /// kept; the arena never shrinks during an operation.
    pub(crate) fn reset_used(&mut self, used_bytes: usize) {
        let used = used_bytes.min(self.buf.len());
        self.buf[..used].fill(0);
    }

    /// Return the backing bytes to the allocator. Idempotent; any later
    /// access fails closed.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        let bytes = self.buf.len();
        self.buf = Vec::new();
        self.capacity_nodes = 0;
        self.released = true;
        if bytes > 0 {
            self.allocator.release(bytes);
        }
        debug!(bytes, "released merge tree arena");
    }
}

impl Drop for NodeArena {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPool;

    fn arena(initial_nodes: usize) -> NodeArena {
        NodeArena::new(Arc::new(MemoryPool::unbounded()), initial_nodes)
    }

    #[test]
    fn growth_preserves_bytes_and_zero_fills() {
        let mut arena = arena(2);
        assert!(arena.ensure_capacity(2));
        arena.write_u32(0, 0, 0xdead_beef);
        arena.write_u32(1, 4, 42);

        assert!(arena.ensure_capacity(5));
        assert!(arena.capacity_nodes() >= 5);
        assert_eq!(arena.read_u32(0, 0), 0xdead_beef);
        assert_eq!(arena.read_u32(1, 4), 42);

        // everything past the old capacity reads as zero
        let view = arena.raw_view().unwrap();
        assert!(view[2 * NODE_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn denied_growth_leaves_arena_usable() {
        let pool = Arc::new(MemoryPool::new(4 * NODE_SIZE));
        let mut arena = NodeArena::new(pool, 2);
        assert!(arena.ensure_capacity(2));
        arena.write_u32(1, 8, 7);

        // doubling to 4 nodes needs 2x + 4x bytes live at once, over budget
        assert!(!arena.ensure_capacity(4));
        assert_eq!(arena.capacity_nodes(), 2);
        assert_eq!(arena.read_u32(1, 8), 7);
        assert!(arena.ensure_capacity(2));
    }

    #[test]
    fn release_is_idempotent_and_fails_closed() {
        let pool = Arc::new(MemoryPool::unbounded());
        let mut arena = NodeArena::new(pool.clone(), 4);
        assert!(arena.ensure_capacity(4));
        assert!(pool.used_bytes() > 0);

        arena.release();
        assert_eq!(pool.used_bytes(), 0);
        arena.release();
        assert_eq!(pool.used_bytes(), 0);

        assert!(arena.raw_view().is_err());
        assert!(!arena.ensure_capacity(1));
    }

    #[test]
    fn reset_zeroes_used_prefix_only() {
        let mut arena = arena(4);
        assert!(arena.ensure_capacity(4));
        arena.write_u32(0, 0, 1);
        arena.write_u32(3, 20, 9);

        arena.reset_used(2 * NODE_SIZE);
        assert_eq!(arena.read_u32(0, 0), 0);
        assert_eq!(arena.read_u32(3, 20), 9);
    }
}
