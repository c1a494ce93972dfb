/// Multi-column ordering specification and the row comparator built from it
///
/// The comparator is the engine's opaque ordering function: a statically
/// typed comparison object resolved against the sort schema once, at
/// operator construction, and treated as a total order everywhere else.
use crate::batch::{BatchStore, RecordRef};
use crate::error::{EngineError, EngineResult};
use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Schema,
    UInt32Type, UInt64Type,
};
use arrow::record_batch::RecordBatch;
use std::cmp::Ordering;

/// One column of the ordering specification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnOrdering {
    /// Column index in the sort schema
    pub column: usize,
    /// Descending instead of ascending
    pub descending: bool,
    /// Whether nulls sort before all values (independent of direction)
    pub nulls_first: bool,
}

impl ColumnOrdering {
    pub fn asc(column: usize) -> Self {
        Self {
            column,
            descending: false,
            nulls_first: true,
        }
    }

    pub fn desc(column: usize) -> Self {
        Self {
            column,
            descending: true,
            nulls_first: true,
        }
    }

    pub fn nulls_first(mut self, nulls_first: bool) -> Self {
        self.nulls_first = nulls_first;
        self
    }
}

/// Sort key types the comparator can dispatch on.
#[derive(Clone, Copy, Debug)]
enum KeyKind {
    Bool,
    Int16,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Utf8,
    LargeUtf8,
    Date32,
}

impl KeyKind {
    fn for_type(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Boolean => Some(Self::Bool),
            DataType::Int16 => Some(Self::Int16),
            DataType::Int32 => Some(Self::Int32),
            DataType::Int64 => Some(Self::Int64),
            DataType::UInt32 => Some(Self::UInt32),
            DataType::UInt64 => Some(Self::UInt64),
            DataType::Float32 => Some(Self::Float32),
            DataType::Float64 => Some(Self::Float64),
            DataType::Utf8 => Some(Self::Utf8),
            DataType::LargeUtf8 => Some(Self::LargeUtf8),
            DataType::Date32 => Some(Self::Date32),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ResolvedKey {
    column: usize,
    kind: KeyKind,
    descending: bool,
    nulls_first: bool,
}

/// Compares rows across any pair of batches carrying the sort schema.
#[derive(Debug)]
pub struct RowComparator {
    keys: Vec<ResolvedKey>,
}

impl RowComparator {
    /// Resolve and type-check the ordering against the sort schema.
    pub fn try_new(schema: &Schema, orderings: &[ColumnOrdering]) -> EngineResult<Self> {
        if orderings.is_empty() {
            return Err(EngineError::schema(
                "sort requires at least one ordering column",
            ));
        }
        let mut keys = Vec::with_capacity(orderings.len());
        for ordering in orderings {
            let field = schema.fields().get(ordering.column).ok_or_else(|| {
                EngineError::schema(format!(
                    "ordering column {} out of range for schema with {} fields",
                    ordering.column,
                    schema.fields().len()
                ))
            })?;
            let kind = KeyKind::for_type(field.data_type()).ok_or_else(|| {
                EngineError::schema(format!(
                    "unsupported sort key type {:?} for column '{}'",
                    field.data_type(),
                    field.name()
                ))
            })?;
            keys.push(ResolvedKey {
                column: ordering.column,
                kind,
                descending: ordering.descending,
                nulls_first: ordering.nulls_first,
            });
        }
        Ok(Self { keys })
    }

    /// Compare one row of `left` against one row of `right`.
    pub fn compare(
        &self,
        left: &RecordBatch,
        left_row: usize,
        right: &RecordBatch,
        right_row: usize,
    ) -> Ordering {
        for key in &self.keys {
            let ordering = compare_key(
                key,
                left.column(key.column).as_ref(),
                left_row,
                right.column(key.column).as_ref(),
                right_row,
            );
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Compare two record references resolved through the batch store.
    pub fn compare_refs(&self, store: &BatchStore, left: RecordRef, right: RecordRef) -> Ordering {
        self.compare(
            store.batch(left.batch),
            left.row as usize,
            store.batch(right.batch),
            right.row as usize,
        )
    }
}

fn compare_key(
    key: &ResolvedKey,
    left: &dyn Array,
    left_row: usize,
    right: &dyn Array,
    right_row: usize,
) -> Ordering {
    match (left.is_null(left_row), right.is_null(right_row)) {
        (true, true) => return Ordering::Equal,
        (true, false) => {
            return if key.nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, true) => {
            return if key.nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, false) => {}
    }

    let ordering = match key.kind {
        KeyKind::Bool => left
            .as_boolean()
            .value(left_row)
            .cmp(&right.as_boolean().value(right_row)),
        KeyKind::Int16 => left
            .as_primitive::<Int16Type>()
            .value(left_row)
            .cmp(&right.as_primitive::<Int16Type>().value(right_row)),
        KeyKind::Int32 => left
            .as_primitive::<Int32Type>()
            .value(left_row)
            .cmp(&right.as_primitive::<Int32Type>().value(right_row)),
        KeyKind::Int64 => left
            .as_primitive::<Int64Type>()
            .value(left_row)
            .cmp(&right.as_primitive::<Int64Type>().value(right_row)),
        KeyKind::UInt32 => left
            .as_primitive::<UInt32Type>()
            .value(left_row)
            .cmp(&right.as_primitive::<UInt32Type>().value(right_row)),
        KeyKind::UInt64 => left
            .as_primitive::<UInt64Type>()
            .value(left_row)
            .cmp(&right.as_primitive::<UInt64Type>().value(right_row)),
        KeyKind::Float32 => left
            .as_primitive::<Float32Type>()
            .value(left_row)
            .total_cmp(&right.as_primitive::<Float32Type>().value(right_row)),
        KeyKind::Float64 => left
            .as_primitive::<Float64Type>()
            .value(left_row)
            .total_cmp(&right.as_primitive::<Float64Type>().value(right_row)),
        KeyKind::Utf8 => left
            .as_string::<i32>()
            .value(left_row)
            .cmp(right.as_string::<i32>().value(right_row)),
        KeyKind::LargeUtf8 => left
            .as_string::<i64>()
            .value(left_row)
            .cmp(right.as_string::<i64>().value(right_row)),
        KeyKind::Date32 => left
            .as_primitive::<Date32Type>()
            .value(left_row)
            .cmp(&right.as_primitive::<Date32Type>().value(right_row)),
    };
    if key.descending {
        ordering.reverse()
    } else {
        ordering
    }
}
