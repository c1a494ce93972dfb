// Two-phase external sort: local batch sort + incremental global merge
pub mod arena;
pub mod local;
pub mod operator;
pub mod ordering;
pub mod producer;
pub mod splay;

pub use arena::NodeArena;
pub use operator::ExternalSortOperator;
pub use ordering::{ColumnOrdering, RowComparator};
pub use splay::{SortedBatches, SplayTree, TreeCursor, NODE_SIZE};
