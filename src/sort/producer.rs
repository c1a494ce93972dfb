/// Final-sort producer
///
/// Drains the merge tree in order and, when runs were spilled, performs the
/// k-way merge between the in-memory traversal and the spilled runs. Output
/// batches are materialized column by column with `interleave`, pulling rows
/// straight out of the source batches without intermediate copies.
use crate::batch::{BatchStore, RecordRef};
use crate::config::SpillCompression;
use crate::error::{EngineError, EngineResult};
use crate::sort::ordering::RowComparator;
use crate::sort::splay::{SplayTree, TreeCursor};
use crate::spill::file::SpillRunReader;
use arrow::array::Array;
use arrow::compute::interleave;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use fxhash::FxHashMap;
use std::cmp::Ordering;
use std::path::PathBuf;
use tracing::info;

/// Copy the referenced rows out of the store into one output batch.
pub(crate) fn materialize(
    store: &BatchStore,
    schema: &SchemaRef,
    refs: &[RecordRef],
) -> EngineResult<RecordBatch> {
    let indices: Vec<(usize, usize)> = refs
        .iter()
        .map(|r| (r.batch as usize, r.row as usize))
        .collect();
    let columns = (0..schema.fields().len())
        .map(|column| {
            let arrays: Vec<&dyn Array> = store
                .batches()
                .iter()
                .map(|batch| batch.column(column).as_ref())
                .collect();
            interleave(&arrays, &indices)
                .map_err(|e| EngineError::internal(format!("interleave failed: {e}")))
        })
        .collect::<EngineResult<Vec<_>>>()?;
    RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| EngineError::internal(format!("failed to assemble output batch: {e}")))
}

/// Identifies one physical source batch across flushes: (run index,
/// per-run batch sequence).
type SourceKey = (usize, u64);

/// Accumulates (source batch, row) pairs and flushes them as one batch.
struct OutputBuilder {
    schema: SchemaRef,
    sources: Vec<RecordBatch>,
    source_ids: FxHashMap<SourceKey, usize>,
    indices: Vec<(usize, usize)>,
}

impl OutputBuilder {
    fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            sources: Vec::new(),
            source_ids: FxHashMap::default(),
            indices: Vec::new(),
        }
    }

    fn push(&mut self, key: SourceKey, batch: &RecordBatch, row: usize) {
        let source = match self.source_ids.get(&key) {
            Some(&source) => source,
            None => {
                let source = self.sources.len();
                self.sources.push(batch.clone());
                self.source_ids.insert(key, source);
                source
            }
        };
        self.indices.push((source, row));
    }

    fn len(&self) -> usize {
        self.indices.len()
    }

    fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Build a batch from the accumulated rows and drop the source batches
    /// so their memory can be reclaimed.
    fn flush(&mut self) -> EngineResult<RecordBatch> {
        let columns = (0..self.schema.fields().len())
            .map(|column| {
                let arrays: Vec<&dyn Array> = self
                    .sources
                    .iter()
                    .map(|batch| batch.column(column).as_ref())
                    .collect();
                interleave(&arrays, &self.indices)
                    .map_err(|e| EngineError::internal(format!("interleave failed: {e}")))
            })
            .collect::<EngineResult<Vec<_>>>()?;
        self.sources.clear();
        self.source_ids.clear();
        self.indices.clear();
        RecordBatch::try_new(self.schema.clone(), columns)
            .map_err(|e| EngineError::internal(format!("failed to assemble output batch: {e}")))
    }
}

/// Cursor over one spilled run file.
struct SpilledRun {
    reader: SpillRunReader,
    current: Option<RecordBatch>,
    row: usize,
    batch_seq: u64,
}

impl SpilledRun {
    fn open(path: &PathBuf, compression: SpillCompression) -> EngineResult<Self> {
        let mut reader = SpillRunReader::open(path, compression)?;
        let mut current = reader.next_batch()?;
        while matches!(&current, Some(batch) if batch.num_rows() == 0) {
            current = reader.next_batch()?;
        }
        Ok(Self {
            reader,
            current,
            row: 0,
            batch_seq: 0,
        })
    }

    fn head(&self) -> Option<(&RecordBatch, usize)> {
        self.current.as_ref().map(|batch| (batch, self.row))
    }

    fn advance(&mut self) -> EngineResult<()> {
        self.row += 1;
        loop {
            match &self.current {
                Some(batch) if self.row < batch.num_rows() => break,
                Some(_) => {
                    self.current = self.reader.next_batch()?;
                    self.row = 0;
                    self.batch_seq += 1;
                }
                None => break,
            }
        }
        Ok(())
    }
}

enum RunCursor {
    Spilled(SpilledRun),
    Tree(TreeCursor),
}

impl RunCursor {
    fn head<'a>(
        &'a self,
        tree: &'a SplayTree,
        store: &'a BatchStore,
    ) -> Option<(&'a RecordBatch, usize)> {
        match self {
            Self::Spilled(run) => run.head(),
            Self::Tree(cursor) => cursor
                .peek(tree)
                .map(|r| (store.batch(r.batch), r.row as usize)),
        }
    }

    fn source_key(&self, run_index: usize, tree: &SplayTree) -> Option<SourceKey> {
        match self {
            Self::Spilled(run) => run.head().map(|_| (run_index, run.batch_seq)),
            Self::Tree(cursor) => cursor.peek(tree).map(|r| (run_index, r.batch as u64)),
        }
    }

    fn advance(&mut self, tree: &SplayTree) -> EngineResult<()> {
        match self {
            Self::Spilled(run) => run.advance(),
            Self::Tree(cursor) => {
                cursor.advance(tree);
                Ok(())
            }
        }
    }
}

/// Merge state of the production phase: one cursor per run, in arrival
/// order — spilled runs first (by spill sequence), the resident tree last.
pub(crate) struct MergeState {
    runs: Vec<RunCursor>,
    builder: Option<OutputBuilder>,
}

impl MergeState {
    pub(crate) fn open(
        spilled: &[PathBuf],
        compression: SpillCompression,
        tree: &SplayTree,
        schema: Option<SchemaRef>,
    ) -> EngineResult<Self> {
        let Some(schema) = schema else {
            return Ok(Self {
                runs: Vec::new(),
                builder: None,
            });
        };
        let mut runs = Vec::with_capacity(spilled.len() + 1);
        for path in spilled {
            runs.push(RunCursor::Spilled(SpilledRun::open(path, compression)?));
        }
        if !tree.is_empty() {
            runs.push(RunCursor::Tree(TreeCursor::new(tree)));
        }
        info!(
            spilled_runs = spilled.len(),
            tree_rows = tree.len(),
            "starting final sort merge"
        );
        Ok(Self {
            runs,
            builder: Some(OutputBuilder::new(schema)),
        })
    }

    /// Produce the next output batch, or `None` once every run is drained.
    /// Exhaustion is sticky.
    pub(crate) fn next_batch(
        &mut self,
        tree: &SplayTree,
        store: &BatchStore,
        comparator: &RowComparator,
        target_batch_size: usize,
    ) -> EngineResult<Option<RecordBatch>> {
        let Some(builder) = &mut self.builder else {
            return Ok(None);
        };

        loop {
            // priority selection: smallest head wins, ties go to the
            // earliest-inserted run
            let mut best: Option<(usize, &RecordBatch, usize)> = None;
            for (index, run) in self.runs.iter().enumerate() {
                let Some((batch, row)) = run.head(tree, store) else {
                    continue;
                };
                best = match best {
                    None => Some((index, batch, row)),
                    Some((best_index, best_batch, best_row)) => {
                        if comparator.compare(batch, row, best_batch, best_row) == Ordering::Less {
                            Some((index, batch, row))
                        } else {
                            Some((best_index, best_batch, best_row))
                        }
                    }
                };
            }

            let Some((winner, batch, row)) = best else {
                // all runs exhausted; flush the remainder once
                if builder.is_empty() {
                    return Ok(None);
                }
                return builder.flush().map(Some);
            };

            let key = match self.runs[winner].source_key(winner, tree) {
                Some(key) => key,
                None => {
                    return Err(EngineError::internal(
                        "merge cursor lost its head mid-selection",
                    ))
                }
            };
            builder.push(key, batch, row);
            self.runs[winner].advance(tree)?;

            if builder.len() >= target_batch_size {
                return builder.flush().map(Some);
            }
        }
    }
}
