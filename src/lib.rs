//! # External Sort Engine
//!
//! An out-of-core external sort engine for columnar record batches:
//! produces a globally sorted stream of rows from a sequence of unsorted
//! Arrow batches, spilling sorted runs to disk when the dataset exceeds the
//! memory budget.
//!
//! Batches are sorted locally on arrival, then merged incrementally into a
//! splay tree whose nodes live in a single growable memory arena addressed
//! by integer offset. When the allocator denies arena growth, the resident
//! generation is written out as a sorted run; the final output is a k-way
//! merge of the tree traversal and all spilled runs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use extsort_engine::{
//!     ColumnOrdering, ExternalSortOperator, MemoryPool, SortConfig, SpillId, SpillService,
//! };
//! use std::sync::Arc;
//!
//! # fn batches() -> Vec<arrow::record_batch::RecordBatch> { Vec::new() }
//! let config = SortConfig::default();
//! let service = Arc::new(SpillService::new(&config.spill));
//! let pool = Arc::new(MemoryPool::new(64 * 1024 * 1024));
//!
//! let mut sort = ExternalSortOperator::new(
//!     vec![ColumnOrdering::asc(0)],
//!     config,
//!     service,
//!     SpillId::new("query-1", 0, 0),
//!     pool,
//! )
//! .unwrap();
//!
//! for batch in batches() {
//!     sort.insert_batch(batch).unwrap();
//! }
//! while let Some(batch) = sort.next_batch().unwrap() {
//!     println!("sorted batch with {} rows", batch.num_rows());
//! }
//! sort.close();
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod memory;
pub mod sort;
pub mod spill;

// Public API - main types users need
pub use batch::{BatchStore, RecordRef, SelectionVector};
pub use config::{SortConfig, SpillCompression, SpillConfig};
pub use error::{EngineError, EngineResult};
pub use memory::{BufferAllocator, MemoryPool};
pub use sort::{ColumnOrdering, ExternalSortOperator, RowComparator, SplayTree};
pub use spill::{SpillId, SpillService};
