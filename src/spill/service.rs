/// Spill coordinator: per-operator spill subdirectories on healthy volumes
///
/// Tracks a set of spill root directories. Operators that support spilling
/// ask for a subdirectory keyed by their composite id, write run files into
/// it, and delete it exactly once on teardown. Roots that fail are marked
/// unhealthy and skipped; when none remain healthy the failure is surfaced
/// as a distinguishable, non-retryable condition.
use crate::config::SpillConfig;
use crate::error::{EngineError, EngineResult};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Composite key uniquely identifying one operator instance,
/// derived from the query/fragment/operator identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpillId {
    query_id: String,
    fragment: u32,
    operator: u32,
}

impl SpillId {
    pub fn new(query_id: impl Into<String>, fragment: u32, operator: u32) -> Self {
        Self {
            query_id: query_id.into(),
            fragment,
            operator,
        }
    }

    /// Directory name for this operator's spill subdirectory.
    pub fn dir_name(&self) -> String {
        format!("{}_{}_{}", self.query_id, self.fragment, self.operator)
    }
}

impl fmt::Display for SpillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Handle to one operator's spill subdirectory.
#[derive(Clone, Debug)]
pub struct SpillDirectory {
    path: PathBuf,
}

impl SpillDirectory {
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Path of the `seq`-th run file inside this subdirectory.
    pub fn run_file(&self, seq: usize) -> PathBuf {
        self.path.join(format!("run_{seq}.arrow"))
    }
}

struct SpillRoot {
    path: PathBuf,
    healthy: AtomicBool,
}

pub struct SpillService {
    roots: Vec<SpillRoot>,
    // rotation state is scoped to this instance, never process-wide
    rotation: AtomicUsize,
}

impl SpillService {
    pub fn new(config: &SpillConfig) -> Self {
        let roots = config
            .directories
            .iter()
            .map(|path| SpillRoot {
                path: path.clone(),
                healthy: AtomicBool::new(true),
            })
            .collect();
        Self {
            roots,
            rotation: AtomicUsize::new(0),
        }
    }

    /// Create the subdirectory `id` under every healthy root. Roots where
    /// creation fails are marked unhealthy; the call succeeds as long as at
    /// least one root accepted the subdirectory.
    pub fn make_spill_subdirs(&self, id: &SpillId) -> EngineResult<()> {
        let dir_name = id.dir_name();
        let mut created = 0usize;
        for root in &self.roots {
            if !root.healthy.load(Ordering::Relaxed) {
                continue;
            }
            let path = root.path.join(&dir_name);
            match std::fs::create_dir_all(&path) {
                Ok(()) => created += 1,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to create spill subdirectory, marking root unhealthy"
                    );
                    root.healthy.store(false, Ordering::Relaxed);
                }
            }
        }
        if created == 0 {
            return Err(EngineError::spill_unavailable(
                "unable to create the spill subdirectory in any spill directory",
                id.dir_name(),
            ));
        }
        debug!(spill_id = %id, roots = created, "created spill subdirectories");
        Ok(())
    }

    /// Pick a healthy spill subdirectory for `id`. Rotates over the healthy
    /// roots to spread I/O load.
    pub fn get_spill_subdir(&self, id: &SpillId) -> EngineResult<SpillDirectory> {
        let healthy: Vec<&SpillRoot> = self
            .roots
            .iter()
            .filter(|root| root.healthy.load(Ordering::Relaxed))
            .collect();
        if healthy.is_empty() {
            return Err(EngineError::spill_unavailable(
                "no healthy spill directory available",
                id.dir_name(),
            ));
        }
        let pick = self.rotation.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Ok(SpillDirectory {
            path: healthy[pick].path.join(id.dir_name()),
        })
    }

    /// Delete the subdirectory `id` under every root. Best-effort; failures
    /// are logged, not surfaced, so teardown always completes.
    pub fn delete_spill_subdirs(&self, id: &SpillId) {
        let dir_name = id.dir_name();
        for root in &self.roots {
            let path = root.path.join(&dir_name);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove spill subdirectory"
                    );
                }
            }
        }
        debug!(spill_id = %id, "deleted spill subdirectories");
    }
}
