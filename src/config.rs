/// Configuration for the external sort engine
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Compression applied to spilled run files
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpillCompression {
    /// Raw Arrow IPC stream
    None,
    /// Arrow IPC stream inside an LZ4 frame
    Lz4,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpillConfig {
    /// Root directories eligible to hold spill subdirectories.
    /// Unhealthy roots are skipped at runtime.
    pub directories: Vec<PathBuf>,
    /// Compression for spilled runs
    pub compression: SpillCompression,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            directories: vec![std::env::temp_dir().join("extsort_spill")],
            compression: SpillCompression::Lz4,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SortConfig {
    /// Row count of produced output batches
    pub target_batch_size: usize,
    /// Resident batch memory (bytes) before a generation is proactively spilled
    pub memory_limit: usize,
    /// Initial merge tree arena capacity, in nodes
    pub initial_tree_capacity: usize,
    /// Spill coordinator configuration
    pub spill: SpillConfig,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            target_batch_size: 4096,
            memory_limit: 100 * 1024 * 1024, // 100 MB default
            initial_tree_capacity: 4096,
            spill: SpillConfig::default(),
        }
    }
}
