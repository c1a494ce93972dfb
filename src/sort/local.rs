/// Batch-local sorter
///
/// Sorts the row indices of one freshly arrived batch, producing the
/// selection vector that seeds its insertion into the merge tree.
use crate::batch::{RecordRef, SelectionVector};
use crate::sort::ordering::RowComparator;
use arrow::record_batch::RecordBatch;

/// Produce a permutation of `batch`'s rows that is non-decreasing under the
/// comparator.
///
/// The permutation is always re-derived from scratch: any ordering the
/// caller may have applied upstream is deliberately ignored so the incoming
/// batch stays immutable and un-aliased. Uses an in-place unstable sort
/// (quicksort family); equal keys keep no particular order beyond what the
/// comparator's own tie-break columns enforce.
pub fn sort_batch(
    batch_id: u32,
    batch: &RecordBatch,
    comparator: &RowComparator,
) -> SelectionVector {
    let mut selection = SelectionVector::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        selection.push(RecordRef::new(batch_id, row as u32));
    }
    selection.refs_mut().sort_unstable_by(|a, b| {
        comparator.compare(batch, a.row as usize, batch, b.row as usize)
    });
    selection
}
