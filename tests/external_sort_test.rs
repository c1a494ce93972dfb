/// Integration tests for the external sort operator
/// Covers global sortedness, completeness, output batching, and teardown
use anyhow::Result;
use arrow::array::{Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use extsort_engine::{
    ColumnOrdering, EngineError, ExternalSortOperator, MemoryPool, SortConfig, SpillId,
    SpillService,
};
use rand::Rng;
use std::sync::Arc;
use tempfile::TempDir;

fn int_batch(values: Vec<Option<i64>>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap()
}

fn some_batch(values: Vec<i64>) -> RecordBatch {
    int_batch(values.into_iter().map(Some).collect())
}

fn operator(
    spill_root: &TempDir,
    orderings: Vec<ColumnOrdering>,
    mut config: SortConfig,
) -> ExternalSortOperator {
    config.spill.directories = vec![spill_root.path().to_path_buf()];
    let service = Arc::new(SpillService::new(&config.spill));
    ExternalSortOperator::new(
        orderings,
        config,
        service,
        SpillId::new("test_query", 0, 0),
        Arc::new(MemoryPool::unbounded()),
    )
    .unwrap()
}

fn column_values(batch: &RecordBatch) -> Vec<Option<i64>> {
    let array = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    (0..array.len())
        .map(|i| if array.is_null(i) { None } else { Some(array.value(i)) })
        .collect()
}

fn drain(sort: &mut ExternalSortOperator) -> Result<Vec<Vec<Option<i64>>>> {
    let mut batches = Vec::new();
    while let Some(batch) = sort.next_batch()? {
        batches.push(column_values(&batch));
    }
    Ok(batches)
}

#[test]
fn two_runs_merge_into_target_batches() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = SortConfig {
        target_batch_size: 4,
        ..SortConfig::default()
    };
    let mut sort = operator(&tmp, vec![ColumnOrdering::asc(0)], config);

    sort.insert_batch(some_batch(vec![3, 1, 2]))?;
    sort.insert_batch(some_batch(vec![6, 5, 4]))?;

    let batches = drain(&mut sort)?;
    assert_eq!(
        batches,
        vec![
            vec![Some(1), Some(2), Some(3), Some(4)],
            vec![Some(5), Some(6)],
        ]
    );
    Ok(())
}

#[test]
fn randomized_input_is_sorted_and_complete() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = SortConfig {
        target_batch_size: 100,
        ..SortConfig::default()
    };
    let mut sort = operator(&tmp, vec![ColumnOrdering::asc(0)], config);

    let mut rng = rand::thread_rng();
    let mut expected: Vec<i64> = Vec::new();
    for _ in 0..13 {
        let values: Vec<i64> = (0..57).map(|_| rng.gen_range(-1000..1000)).collect();
        expected.extend(&values);
        sort.insert_batch(some_batch(values))?;
    }
    expected.sort_unstable();

    let produced: Vec<i64> = drain(&mut sort)?
        .into_iter()
        .flatten()
        .map(|v| v.unwrap())
        .collect();
    assert_eq!(produced, expected);
    Ok(())
}

#[test]
fn descending_with_nulls_last() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut sort = operator(
        &tmp,
        vec![ColumnOrdering::desc(0).nulls_first(false)],
        SortConfig::default(),
    );

    sort.insert_batch(int_batch(vec![Some(1), None, Some(3)]))?;
    sort.insert_batch(int_batch(vec![Some(2), None]))?;

    let rows: Vec<Option<i64>> = drain(&mut sort)?.into_iter().flatten().collect();
    assert_eq!(rows, vec![Some(3), Some(2), Some(1), None, None]);
    Ok(())
}

#[test]
fn empty_input_produces_no_batches() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut sort = operator(&tmp, vec![ColumnOrdering::asc(0)], SortConfig::default());
    assert!(sort.next_batch()?.is_none());
    assert!(sort.next_batch()?.is_none());
    Ok(())
}

#[test]
fn drained_output_stays_empty() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut sort = operator(&tmp, vec![ColumnOrdering::asc(0)], SortConfig::default());
    sort.insert_batch(some_batch(vec![2, 1]))?;

    let batches = drain(&mut sort)?;
    assert_eq!(batches.len(), 1);
    // traversal state is torn down; pulling again repeats nothing
    assert!(sort.next_batch()?.is_none());
    assert!(sort.next_batch()?.is_none());
    Ok(())
}

#[test]
fn schema_drift_is_rejected() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut sort = operator(&tmp, vec![ColumnOrdering::asc(0)], SortConfig::default());
    sort.insert_batch(some_batch(vec![1]))?;

    let other = Arc::new(Schema::new(vec![Field::new("v", DataType::Utf8, true)]));
    let drifted = RecordBatch::try_new(
        other,
        vec![Arc::new(arrow::array::StringArray::from(vec!["x"]))],
    )?;
    let err = sort.insert_batch(drifted).unwrap_err();
    assert!(matches!(err, EngineError::Schema { .. }));
    Ok(())
}

#[test]
fn close_is_idempotent_and_fails_later_calls() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut sort = operator(&tmp, vec![ColumnOrdering::asc(0)], SortConfig::default());
    sort.insert_batch(some_batch(vec![1, 2]))?;

    sort.close();
    sort.close();

    assert!(matches!(
        sort.insert_batch(some_batch(vec![3])).unwrap_err(),
        EngineError::Cancellation { .. }
    ));
    assert!(matches!(
        sort.next_batch().unwrap_err(),
        EngineError::Cancellation { .. }
    ));
    Ok(())
}

#[test]
fn memory_limit_spills_every_generation() -> Result<()> {
    let tmp = TempDir::new()?;
    let config = SortConfig {
        target_batch_size: 4,
        memory_limit: 1, // every insert crosses the threshold
        ..SortConfig::default()
    };
    let mut sort = operator(&tmp, vec![ColumnOrdering::asc(0)], config);

    sort.insert_batch(some_batch(vec![9, 4]))?;
    sort.insert_batch(some_batch(vec![7, 2]))?;
    sort.insert_batch(some_batch(vec![5, 0]))?;
    assert_eq!(sort.spilled_run_count(), 3);

    let rows: Vec<i64> = drain(&mut sort)?
        .into_iter()
        .flatten()
        .map(|v| v.unwrap())
        .collect();
    assert_eq!(rows, vec![0, 2, 4, 5, 7, 9]);

    // teardown removes the spill subdirectory
    sort.close();
    let leftover: Vec<_> = std::fs::read_dir(tmp.path())?.collect();
    assert!(leftover.is_empty(), "spill subdirectory should be deleted");
    Ok(())
}
