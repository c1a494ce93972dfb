/// External sort operator
///
/// Owns the arena-backed merge tree, the resident batch store, the
/// comparator and all spill state for one sort, and guarantees their
/// release exactly once on every exit path. Single-threaded by design: the
/// owning pipeline serializes ingestion and production, so there is no
/// internal locking.
use crate::batch::BatchStore;
use crate::config::SortConfig;
use crate::error::{EngineError, EngineResult};
use crate::memory::BufferAllocator;
use crate::sort::local;
use crate::sort::ordering::{ColumnOrdering, RowComparator};
use crate::sort::producer::{materialize, MergeState};
use crate::sort::splay::SplayTree;
use crate::spill::file::SpillRunWriter;
use crate::spill::service::{SpillDirectory, SpillId, SpillService};
use arrow::record_batch::RecordBatch;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

enum Phase {
    Ingest,
    Produce(MergeState),
    Closed,
}

pub struct ExternalSortOperator {
    config: SortConfig,
    orderings: Vec<ColumnOrdering>,
    comparator: Option<RowComparator>,
    store: BatchStore,
    tree: SplayTree,
    spill_service: Arc<SpillService>,
    spill_id: SpillId,
    spill_dir: Option<SpillDirectory>,
    spilled_runs: Vec<PathBuf>,
    phase: Phase,
}

impl ExternalSortOperator {
    pub fn new(
        orderings: Vec<ColumnOrdering>,
        config: SortConfig,
        spill_service: Arc<SpillService>,
        spill_id: SpillId,
        allocator: Arc<dyn BufferAllocator>,
    ) -> EngineResult<Self> {
        if orderings.is_empty() {
            return Err(EngineError::schema(
                "sort requires at least one ordering column",
            ));
        }
        let tree = SplayTree::new(allocator, config.initial_tree_capacity);
        Ok(Self {
            config,
            orderings,
            comparator: None,
            store: BatchStore::new(),
            tree,
            spill_service,
            spill_id,
            spill_dir: None,
            spilled_runs: Vec::new(),
            phase: Phase::Ingest,
        })
    }

    /// Ingest one batch: register it, sort it locally, insert the run into
    /// the merge tree. A recoverable memory failure spills the resident
    /// generation and retries the insert once; a second failure propagates.
    pub fn insert_batch(&mut self, batch: RecordBatch) -> EngineResult<()> {
        match self.phase {
            Phase::Ingest => {}
            Phase::Produce(_) => {
                return Err(EngineError::internal(
                    "insert_batch called after production started",
                ))
            }
            Phase::Closed => {
                return Err(EngineError::cancellation("sort operator is closed"));
            }
        }

        let comparator = match self.comparator.take() {
            Some(comparator) => comparator,
            None => RowComparator::try_new(batch.schema().as_ref(), &self.orderings)?,
        };
        let result = self.insert_batch_inner(batch, &comparator);
        self.comparator = Some(comparator);
        result
    }

    fn insert_batch_inner(
        &mut self,
        batch: RecordBatch,
        comparator: &RowComparator,
    ) -> EngineResult<()> {
        let batch_id = self.store.register(batch)?;
        let run = local::sort_batch(batch_id, self.store.batch(batch_id), comparator);

        let inserted = {
            let store = &self.store;
            self.tree
                .insert_run(&run, &mut |a, b| comparator.compare_refs(store, a, b))
        };
        match inserted {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                warn!(
                    spill_id = %self.spill_id,
                    tree_rows = self.tree.len(),
                    "memory exhausted inserting into merge tree, spilling current generation"
                );
                let batch = self.store.take_last().ok_or_else(|| {
                    EngineError::internal("registered batch missing during spill retry")
                })?;
                self.spill_generation()?;

                let batch_id = self.store.register(batch)?;
                let run = local::sort_batch(batch_id, self.store.batch(batch_id), comparator);
                let store = &self.store;
                self.tree
                    .insert_run(&run, &mut |a, b| comparator.compare_refs(store, a, b))?;
            }
            Err(e) => return Err(e),
        }

        if self.store.memory_bytes() >= self.config.memory_limit {
            debug!(
                spill_id = %self.spill_id,
                resident_bytes = self.store.memory_bytes(),
                limit = self.config.memory_limit,
                "memory limit reached, spilling current generation"
            );
            self.spill_generation()?;
        }
        Ok(())
    }

    /// Flush the resident generation to disk as one sorted run and reset
    /// the tree and store. Exposed so the enclosing pipeline can relieve
    /// memory pressure on its own schedule; a no-op on an empty tree.
    pub fn spill(&mut self) -> EngineResult<()> {
        if matches!(self.phase, Phase::Closed) {
            return Err(EngineError::cancellation("sort operator is closed"));
        }
        if matches!(self.phase, Phase::Produce(_)) {
            return Err(EngineError::internal(
                "spill requested after production started",
            ));
        }
        self.spill_generation()
    }

    fn spill_generation(&mut self) -> EngineResult<()> {
        if self.tree.is_empty() {
            self.store.clear();
            return Ok(());
        }
        let schema = self
            .store
            .schema()
            .ok_or_else(|| EngineError::internal("non-empty tree without a schema"))?;

        let directory = self.spill_dir()?;
        let seq = self.spilled_runs.len();
        let path = directory.run_file(seq);
        let rows = self.tree.len();

        let mut writer =
            SpillRunWriter::create(&path, schema.clone(), self.config.spill.compression)?;
        for selection in self.tree.sorted_batches(self.config.target_batch_size) {
            writer.write_batch(&materialize(&self.store, &schema, selection.as_refs())?)?;
        }
        writer.finish()?;

        info!(
            spill_id = %self.spill_id,
            run = seq,
            rows,
            path = %path.display(),
            "spilled sorted run"
        );
        self.spilled_runs.push(path);
        self.tree.reset();
        self.store.clear();
        Ok(())
    }

    fn spill_dir(&mut self) -> EngineResult<SpillDirectory> {
        if let Some(directory) = &self.spill_dir {
            return Ok(directory.clone());
        }
        self.spill_service.make_spill_subdirs(&self.spill_id)?;
        let directory = self.spill_service.get_spill_subdir(&self.spill_id)?;
        self.spill_dir = Some(directory.clone());
        Ok(directory)
    }

    /// Pull the next globally sorted output batch. The first call ends
    /// ingestion and opens the merge; nothing is produced until requested.
    /// Returns `None` once every run is drained, and keeps returning `None`.
    pub fn next_batch(&mut self) -> EngineResult<Option<RecordBatch>> {
        if matches!(self.phase, Phase::Closed) {
            return Err(EngineError::cancellation("sort operator is closed"));
        }
        if matches!(self.phase, Phase::Ingest) {
            let merge = MergeState::open(
                &self.spilled_runs,
                self.config.spill.compression,
                &self.tree,
                self.store.schema(),
            )?;
            self.phase = Phase::Produce(merge);
        }

        match (&mut self.phase, &self.comparator) {
            (Phase::Produce(merge), Some(comparator)) => merge.next_batch(
                &self.tree,
                &self.store,
                comparator,
                self.config.target_batch_size,
            ),
            // nothing was ever inserted
            _ => Ok(None),
        }
    }

    /// Release every resource exactly once: merge state (closes any open
    /// run readers), arena and tree, resident batches, and the spill
    /// subdirectories. Idempotent; also invoked from `Drop`.
    pub fn close(&mut self) {
        if matches!(self.phase, Phase::Closed) {
            return;
        }
        debug!(spill_id = %self.spill_id, "closing external sort operator");
        self.phase = Phase::Closed;
        self.tree.release();
        self.store.clear();
        if self.spill_dir.take().is_some() || !self.spilled_runs.is_empty() {
            self.spill_service.delete_spill_subdirs(&self.spill_id);
        }
        self.spilled_runs.clear();
    }

    /// Number of runs spilled so far.
    pub fn spilled_run_count(&self) -> usize {
        self.spilled_runs.len()
    }
}

impl Drop for ExternalSortOperator {
    fn drop(&mut self) {
        self.close();
    }
}
