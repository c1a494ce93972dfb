/// Unified error type for the external sort engine
/// Provides structured error handling with categories for different failure modes
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Memory errors: arena growth denied by the allocator.
    /// Recoverable by the caller via spilling; never corrupts existing data.
    #[error("Memory error: {message}")]
    Memory {
        message: String,
        requested: Option<usize>,
        capacity: Option<usize>,
    },

    /// No healthy spill directory is available.
    /// Fatal for the current query, not retried internally.
    #[error("Spill directory unavailable: {message}")]
    SpillUnavailable {
        message: String,
        spill_id: Option<String>,
    },

    /// Schema errors: an incoming batch's layout is incompatible with the
    /// configured ordering, or a sort key column has an unsupported type.
    #[error("Schema error: {message}")]
    Schema {
        message: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// IO errors: spill file read/write failures
    #[error("IO error: {message}")]
    IO {
        message: String,
        path: Option<String>,
        source_message: Option<String>,
    },

    /// Cancellation: the operator was closed before the call
    #[error("Cancellation: {message}")]
    Cancellation {
        message: String,
    },

    /// Internal errors: should never happen, indicates bug
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        context: Option<String>,
    },
}

impl EngineError {
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
            requested: None,
            capacity: None,
        }
    }

    pub fn memory_with_usage(message: impl Into<String>, requested: usize, capacity: usize) -> Self {
        Self::Memory {
            message: message.into(),
            requested: Some(requested),
            capacity: Some(capacity),
        }
    }

    pub fn spill_unavailable(message: impl Into<String>, spill_id: impl Into<String>) -> Self {
        Self::SpillUnavailable {
            message: message.into(),
            spill_id: Some(spill_id.into()),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn schema_mismatch(
        message: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Schema {
            message: message.into(),
            expected: Some(expected.into()),
            actual: Some(actual.into()),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::IO {
            message: message.into(),
            path: None,
            source_message: None,
        }
    }

    pub fn io_with_path(
        message: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self::IO {
            message: message.into(),
            path: Some(path.into()),
            source_message: Some(source.into()),
        }
    }

    pub fn cancellation(message: impl Into<String>) -> Self {
        Self::Cancellation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    pub fn internal_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Whether the caller can recover from this error by spilling.
    /// Only allocator denials are recoverable; everything else is fatal
    /// for the current query.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Memory { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
