/// Incremental merge tree: a splay tree over the node arena
///
/// Logically a sorted multiset of record references; physically fixed-size
/// node records inside [`NodeArena`], linked by `u32` arena indices. Index 0
/// is the nil sentinel, so a zero-filled arena already reads as "no child,
/// no parent" everywhere and slot 0 never holds data.
///
/// Node layout, six little-endian `u32` words (24 bytes):
///
/// ```text
/// +--------------+ 0
/// | left child   | 4
/// | right child  | 8
/// | parent       | 12
/// | batch id     | 16
/// | row offset   | 20
/// | reserved (0) | 24 (NODE_SIZE)
/// +--------------+
/// ```
use crate::batch::{RecordRef, SelectionVector};
use crate::error::{EngineError, EngineResult};
use crate::memory::BufferAllocator;
use crate::sort::arena::NodeArena;
use std::cmp::Ordering;
use std::sync::Arc;

pub const NODE_SIZE: usize = 24;

const NIL: u32 = 0;

const OFF_LEFT: usize = 0;
const OFF_RIGHT: usize = 4;
const OFF_PARENT: usize = 8;
const OFF_BATCH: usize = 12;
const OFF_ROW: usize = 16;

pub struct SplayTree {
    arena: NodeArena,
    root: u32,
    len: u32,
}

impl SplayTree {
    pub fn new(allocator: Arc<dyn BufferAllocator>, initial_nodes: usize) -> Self {
        Self {
            arena: NodeArena::new(allocator, initial_nodes + 1),
            root: NIL,
            len: 0,
        }
    }

    /// Number of record references held by the tree.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// Ingest one locally sorted run.
    ///
    /// Arena capacity for the whole run is reserved up front: if the
    /// allocator denies the growth, the call fails with a recoverable
    /// memory error and *nothing* has been inserted — every node written by
    /// earlier calls is untouched. Each reference is inserted by descent and
    /// the inserted node is splayed to the root; because the run arrives in
    /// sorted order the descent paths stay short across consecutive
    /// insertions, keeping the amortized cost logarithmic in the tree size.
    pub fn insert_run(
        &mut self,
        run: &SelectionVector,
        cmp: &mut dyn FnMut(RecordRef, RecordRef) -> Ordering,
    ) -> EngineResult<()> {
        // +1 for the nil sentinel slot
        let required = self.len as usize + run.len() + 1;
        if !self.arena.ensure_capacity(required) {
            return Err(EngineError::memory_with_usage(
                "merge tree arena growth denied by the allocator",
                required * NODE_SIZE,
                self.arena.capacity_bytes(),
            ));
        }
        for record in run.iter() {
            self.insert_one(record, cmp);
        }
        Ok(())
    }

    fn insert_one(&mut self, record: RecordRef, cmp: &mut dyn FnMut(RecordRef, RecordRef) -> Ordering) {
        let node = self.len + 1;
        self.len += 1;
        self.arena.write_u32(node, OFF_LEFT, NIL);
        self.arena.write_u32(node, OFF_RIGHT, NIL);
        self.arena.write_u32(node, OFF_PARENT, NIL);
        self.arena.write_u32(node, OFF_BATCH, record.batch);
        self.arena.write_u32(node, OFF_ROW, record.row);

        if self.root == NIL {
            self.root = node;
            return;
        }

        let mut current = self.root;
        loop {
            // equal keys descend right; the tree imposes no tie-break of its own
            if cmp(record, self.record(current)) == Ordering::Less {
                let left = self.left(current);
                if left == NIL {
                    self.set_left(current, node);
                    self.set_parent(node, current);
                    break;
                }
                current = left;
            } else {
                let right = self.right(current);
                if right == NIL {
                    self.set_right(current, node);
                    self.set_parent(node, current);
                    break;
                }
                current = right;
            }
        }
        self.splay(node);
    }

    /// Bottom-up splay of `node` to the root (zig / zig-zig / zig-zag).
    fn splay(&mut self, node: u32) {
        while self.parent(node) != NIL {
            let parent = self.parent(node);
            let grandparent = self.parent(parent);
            if grandparent == NIL {
                // zig
                self.rotate_up(node);
            } else if (self.left(grandparent) == parent) == (self.left(parent) == node) {
                // zig-zig: rotate the parent first
                self.rotate_up(parent);
                self.rotate_up(node);
            } else {
                // zig-zag
                self.rotate_up(node);
                self.rotate_up(node);
            }
        }
    }

    /// Rotate `node` one level up over its parent.
    fn rotate_up(&mut self, node: u32) {
        let parent = self.parent(node);
        debug_assert_ne!(parent, NIL);
        let grandparent = self.parent(parent);

        if self.left(parent) == node {
            let moved = self.right(node);
            self.set_left(parent, moved);
            if moved != NIL {
                self.set_parent(moved, parent);
            }
            self.set_right(node, parent);
        } else {
            let moved = self.left(node);
            self.set_right(parent, moved);
            if moved != NIL {
                self.set_parent(moved, parent);
            }
            self.set_left(node, parent);
        }
        self.set_parent(parent, node);
        self.set_parent(node, grandparent);

        if grandparent == NIL {
            self.root = node;
        } else if self.left(grandparent) == parent {
            self.set_left(grandparent, node);
        } else {
            self.set_right(grandparent, node);
        }
    }

    pub(crate) fn record(&self, node: u32) -> RecordRef {
        RecordRef::new(
            self.arena.read_u32(node, OFF_BATCH),
            self.arena.read_u32(node, OFF_ROW),
        )
    }

    fn left(&self, node: u32) -> u32 {
        self.arena.read_u32(node, OFF_LEFT)
    }

    fn right(&self, node: u32) -> u32 {
        self.arena.read_u32(node, OFF_RIGHT)
    }

    fn parent(&self, node: u32) -> u32 {
        self.arena.read_u32(node, OFF_PARENT)
    }

    fn set_left(&mut self, node: u32, child: u32) {
        self.arena.write_u32(node, OFF_LEFT, child);
    }

    fn set_right(&mut self, node: u32, child: u32) {
        self.arena.write_u32(node, OFF_RIGHT, child);
    }

    fn set_parent(&mut self, node: u32, parent: u32) {
        self.arena.write_u32(node, OFF_PARENT, parent);
    }

    fn leftmost(&self, mut node: u32) -> u32 {
        if node == NIL {
            return NIL;
        }
        while self.left(node) != NIL {
            node = self.left(node);
        }
        node
    }

    /// In-order successor via child/parent links; no recursion, no heap
    /// state.
    fn successor(&self, node: u32) -> u32 {
        let right = self.right(node);
        if right != NIL {
            return self.leftmost(right);
        }
        let mut current = node;
        let mut parent = self.parent(current);
        while parent != NIL && self.right(parent) == current {
            current = parent;
            parent = self.parent(current);
        }
        parent
    }

    /// Lazy in-order traversal in fixed-size groups of record references.
    ///
    /// The sequence is finite (bounded by the node count) and visits every
    /// node exactly once. It is not restartable: once consumed, a fresh
    /// traversal requires the tree to still hold the undrained data.
    pub fn sorted_batches(&self, target_batch_size: usize) -> SortedBatches<'_> {
        SortedBatches {
            tree: self,
            cursor: TreeCursor::new(self),
            target: target_batch_size.max(1),
        }
    }

    /// Forget all nodes and zero the used slots. Capacity is retained; the
    /// arena never shrinks during an operation.
    pub fn reset(&mut self) {
        self.arena.reset_used((self.len as usize + 1) * NODE_SIZE);
        self.root = NIL;
        self.len = 0;
    }

    /// Release the arena. Idempotent; the tree is unusable afterwards.
    pub fn release(&mut self) {
        self.root = NIL;
        self.len = 0;
        self.arena.release();
    }
}

/// In-order cursor over an undrained tree.
///
/// Finite and not restartable: once the cursor has walked off the end it
/// stays exhausted. A fresh traversal requires constructing a new cursor
/// while the tree still holds the data. Traversal is read-only and visits
/// every node exactly once.
#[derive(Clone, Copy, Debug)]
pub struct TreeCursor {
    next: u32,
}

impl TreeCursor {
    pub fn new(tree: &SplayTree) -> Self {
        Self {
            next: tree.leftmost(tree.root),
        }
    }

    pub fn peek(&self, tree: &SplayTree) -> Option<RecordRef> {
        if self.next == NIL {
            None
        } else {
            Some(tree.record(self.next))
        }
    }

    pub fn advance(&mut self, tree: &SplayTree) {
        if self.next != NIL {
            self.next = tree.successor(self.next);
        }
    }

    pub fn next(&mut self, tree: &SplayTree) -> Option<RecordRef> {
        let record = self.peek(tree);
        self.advance(tree);
        record
    }
}

/// Iterator state of one tree traversal, yielding selection vectors of at
/// most the target size.
pub struct SortedBatches<'a> {
    tree: &'a SplayTree,
    cursor: TreeCursor,
    target: usize,
}

impl Iterator for SortedBatches<'_> {
    type Item = SelectionVector;

    fn next(&mut self) -> Option<SelectionVector> {
        self.cursor.peek(self.tree)?;
        let mut selection = SelectionVector::with_capacity(self.target);
        while selection.len() < self.target {
            match self.cursor.next(self.tree) {
                Some(record) => selection.push(record),
                None => break,
            }
        }
        Some(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BufferAllocator, MemoryPool};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Orders refs by row only; good enough for structural tests.
    fn by_row() -> impl FnMut(RecordRef, RecordRef) -> Ordering {
        |a: RecordRef, b: RecordRef| a.row.cmp(&b.row)
    }

    fn run(batch: u32, rows: &[u32]) -> SelectionVector {
        rows.iter()
            .map(|&row| RecordRef::new(batch, row))
            .collect::<Vec<_>>()
            .into()
    }

    fn drain(tree: &SplayTree) -> Vec<u32> {
        let mut cursor = TreeCursor::new(tree);
        let mut rows = Vec::new();
        while let Some(record) = cursor.next(tree) {
            rows.push(record.row);
        }
        rows
    }

    #[test]
    fn single_run_traverses_in_order() {
        let mut tree = SplayTree::new(Arc::new(MemoryPool::unbounded()), 4);
        tree.insert_run(&run(0, &[1, 2, 3]), &mut by_row()).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(drain(&tree), vec![1, 2, 3]);
    }

    #[test]
    fn interleaved_runs_merge_globally() {
        let mut tree = SplayTree::new(Arc::new(MemoryPool::unbounded()), 4);
        tree.insert_run(&run(0, &[1, 4, 7]), &mut by_row()).unwrap();
        tree.insert_run(&run(1, &[0, 5, 6]), &mut by_row()).unwrap();
        tree.insert_run(&run(2, &[2, 3, 8]), &mut by_row()).unwrap();
        assert_eq!(drain(&tree), vec![0, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn equal_keys_all_survive() {
        let mut tree = SplayTree::new(Arc::new(MemoryPool::unbounded()), 4);
        tree.insert_run(&run(0, &[5, 5, 5]), &mut by_row()).unwrap();
        tree.insert_run(&run(1, &[5, 5]), &mut by_row()).unwrap();
        assert_eq!(drain(&tree), vec![5, 5, 5, 5, 5]);
    }

    #[test]
    fn exhausted_cursor_stays_empty() {
        let mut tree = SplayTree::new(Arc::new(MemoryPool::unbounded()), 4);
        tree.insert_run(&run(0, &[1, 2]), &mut by_row()).unwrap();

        let mut cursor = TreeCursor::new(&tree);
        assert!(cursor.next(&tree).is_some());
        assert!(cursor.next(&tree).is_some());
        assert!(cursor.next(&tree).is_none());
        assert!(cursor.next(&tree).is_none());

        // the tree still holds the data for a fresh traversal
        assert_eq!(drain(&tree), vec![1, 2]);
    }

    #[test]
    fn sorted_batches_chunk_the_traversal() {
        let mut tree = SplayTree::new(Arc::new(MemoryPool::unbounded()), 4);
        tree.insert_run(&run(0, &[3, 1, 2]), &mut by_row()).unwrap();
        tree.insert_run(&run(1, &[6, 5, 4]), &mut by_row()).unwrap();

        let chunks: Vec<Vec<u32>> = tree
            .sorted_batches(4)
            .map(|s| s.iter().map(|r| r.row).collect())
            .collect();
        assert_eq!(chunks, vec![vec![1, 2, 3, 4], vec![5, 6]]);
    }

    #[test]
    fn reset_forgets_content_but_keeps_capacity() {
        let mut tree = SplayTree::new(Arc::new(MemoryPool::unbounded()), 4);
        tree.insert_run(&run(0, &[3, 9]), &mut by_row()).unwrap();
        let capacity = tree.arena().capacity_nodes();

        tree.reset();
        assert!(tree.is_empty());
        assert_eq!(drain(&tree), Vec::<u32>::new());
        assert_eq!(tree.arena().capacity_nodes(), capacity);

        tree.insert_run(&run(0, &[2, 1]), &mut by_row()).unwrap();
        assert_eq!(drain(&tree), vec![1, 2]);
    }

    /// Denies every allocation after the first `allowed` calls.
    struct FlakyAllocator {
        inner: MemoryPool,
        calls: AtomicUsize,
        allowed: usize,
    }

    impl FlakyAllocator {
        fn new(allowed: usize) -> Self {
            Self {
                inner: MemoryPool::unbounded(),
                calls: AtomicUsize::new(0),
                allowed,
            }
        }
    }

    impl BufferAllocator for FlakyAllocator {
        fn allocate(&self, bytes: usize) -> Option<Vec<u8>> {
            if self.calls.fetch_add(1, AtomicOrdering::Relaxed) >= self.allowed {
                return None;
            }
            self.inner.allocate(bytes)
        }

        fn release(&self, bytes: usize) {
            self.inner.release(bytes);
        }
    }

    #[test]
    fn denied_growth_reports_memory_and_keeps_prior_runs() {
        // one allocation allowed: the initial region of 4+1 slots
        let mut tree = SplayTree::new(Arc::new(FlakyAllocator::new(1)), 4);
        tree.insert_run(&run(0, &[2, 4]), &mut by_row()).unwrap();
        tree.insert_run(&run(1, &[1, 3]), &mut by_row()).unwrap();

        let err = tree
            .insert_run(&run(2, &[0, 5]), &mut by_row())
            .unwrap_err();
        assert!(err.is_recoverable());

        // previously inserted data still drains correctly and completely
        assert_eq!(drain(&tree), vec![1, 2, 3, 4]);
    }
}
