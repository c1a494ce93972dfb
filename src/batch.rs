/// Record references, selection vectors and the resident batch store
use crate::error::{EngineError, EngineResult};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

/// Identifies one row: (registered batch id, row offset within that batch).
/// Immutable once assigned; the engine only ever reorders references, never
/// row content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordRef {
    pub batch: u32,
    pub row: u32,
}

impl RecordRef {
    pub fn new(batch: u32, row: u32) -> Self {
        Self { batch, row }
    }
}

/// An ordered sequence of record references representing one sort run.
/// Owned by whichever stage produced it and moved to the next.
#[derive(Clone, Debug, Default)]
pub struct SelectionVector {
    refs: Vec<RecordRef>,
}

impl SelectionVector {
    pub fn new() -> Self {
        Self { refs: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            refs: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: RecordRef) {
        self.refs.push(record);
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordRef> + '_ {
        self.refs.iter().copied()
    }

    pub fn as_refs(&self) -> &[RecordRef] {
        &self.refs
    }

    pub(crate) fn refs_mut(&mut self) -> &mut [RecordRef] {
        &mut self.refs
    }
}

impl From<Vec<RecordRef>> for SelectionVector {
    fn from(refs: Vec<RecordRef>) -> Self {
        Self { refs }
    }
}

/// Owns the record batches of the current in-memory generation.
///
/// Batches are immutable from the engine's perspective. Every registered
/// batch must carry the schema of the first one; drift is surfaced as a
/// schema error before any reference to the batch is created.
pub struct BatchStore {
    schema: Option<SchemaRef>,
    batches: Vec<RecordBatch>,
    bytes: usize,
}

impl BatchStore {
    pub fn new() -> Self {
        Self {
            schema: None,
            batches: Vec::new(),
            bytes: 0,
        }
    }

    /// Register a batch and return its id for use in record references.
    pub fn register(&mut self, batch: RecordBatch) -> EngineResult<u32> {
        match &self.schema {
            Some(schema) => {
                if batch.schema().as_ref() != schema.as_ref() {
                    return Err(EngineError::schema_mismatch(
                        "incoming batch schema does not match the sort schema",
                        format!("{schema:?}"),
                        format!("{:?}", batch.schema()),
                    ));
                }
            }
            None => self.schema = Some(batch.schema()),
        }
        if batch.num_rows() > u32::MAX as usize {
            return Err(EngineError::internal(format!(
                "batch of {} rows exceeds the row offset range",
                batch.num_rows()
            )));
        }

        let id = self.batches.len() as u32;
        self.bytes += batch.get_array_memory_size();
        self.batches.push(batch);
        Ok(id)
    }

    pub fn batch(&self, id: u32) -> &RecordBatch {
        &self.batches[id as usize]
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Schema of the registered batches; retained across `clear`.
    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone()
    }

    /// Accumulated Arrow buffer memory of the resident generation.
    pub fn memory_bytes(&self) -> usize {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Remove and return the most recently registered batch.
    pub(crate) fn take_last(&mut self) -> Option<RecordBatch> {
        let batch = self.batches.pop()?;
        self.bytes = self.bytes.saturating_sub(batch.get_array_memory_size());
        Some(batch)
    }

    /// Drop all resident batches, keeping the schema for later generations.
    pub fn clear(&mut self) {
        self.batches.clear();
        self.bytes = 0;
    }
}

impl Default for BatchStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn int_batch(values: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap()
    }

    #[test]
    fn register_assigns_sequential_ids() {
        let mut store = BatchStore::new();
        assert_eq!(store.register(int_batch(vec![1, 2])).unwrap(), 0);
        assert_eq!(store.register(int_batch(vec![3])).unwrap(), 1);
        assert_eq!(store.len(), 2);
        assert!(store.memory_bytes() > 0);
    }

    #[test]
    fn register_rejects_schema_drift() {
        let mut store = BatchStore::new();
        store.register(int_batch(vec![1])).unwrap();

        let other = Arc::new(Schema::new(vec![Field::new("v", DataType::Utf8, true)]));
        let batch = RecordBatch::try_new(
            other,
            vec![Arc::new(arrow::array::StringArray::from(vec!["a"]))],
        )
        .unwrap();
        let err = store.register(batch).unwrap_err();
        assert!(matches!(err, EngineError::Schema { .. }));
    }

    #[test]
    fn clear_keeps_schema() {
        let mut store = BatchStore::new();
        store.register(int_batch(vec![1])).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.memory_bytes(), 0);
        assert!(store.schema().is_some());
    }
}
