// Spill-to-disk module: per-operator subdirectories and sorted run files
pub mod file;
pub mod service;

pub use file::{SpillRunReader, SpillRunWriter};
pub use service::{SpillDirectory, SpillId, SpillService};
