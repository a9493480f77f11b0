//! Error types for entiq.
//!
//! All errors are strongly typed using thiserror. Query construction
//! problems surface as [`ValidationError`] before any backend is touched;
//! storage problems surface as [`StoreError`]. Missing entities are
//! represented as `Option::None`, never as an error.

use thiserror::Error;

/// Validation errors raised while building a [`Query`](crate::Query).
///
/// These are caught at clause-construction time and never reach a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum ValidationError {
    #[error("Unknown filter field: {field}")]
    UnknownField { field: String },

    #[error("Unknown comparator: {comparator}")]
    UnknownComparator { comparator: String },

    #[error("Unknown schema: {schema}")]
    UnknownSchema { schema: String },

    #[error("Comparator `{comparator}` requires a scalar value, got a set")]
    ScalarExpected { comparator: String },

    #[error("Comparator `in` requires a set of values")]
    SetExpected,

    #[error("Invalid value for field `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid slice: start {start} is past stop {stop}")]
    InvalidSlice { start: usize, stop: usize },

    #[error("Unknown aggregation function: {func}")]
    UnknownAggFunc { func: String },

    #[error("Malformed query map: {reason}")]
    MalformedMap { reason: String },
}

/// Statements with incomparable schemas cannot be assembled into one entity
/// unless downgrading to a shared ancestor is explicitly allowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot reconcile schema `{left}` with `{right}`")]
pub struct SchemaConflict {
    /// Schema resolved so far.
    pub left: String,
    /// Schema of the conflicting statement.
    pub right: String,
}

/// Errors from storage backends and the store factory.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The URI scheme is recognized but the backend was compiled out.
    #[error("Backend for `{scheme}` is unavailable; build with feature `{feature}`")]
    BackendUnavailable {
        scheme: String,
        feature: &'static str,
    },

    /// The URI scheme does not map to any known backend.
    #[error("Unsupported store URI: {0}")]
    UnsupportedScheme(String),

    /// Underlying medium failure. Propagated, never auto-retried.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Statement encoding/decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A closed writer is never reused.
    #[error("Writer is closed")]
    ClosedWriter,

    /// The backend does not accept writes.
    #[error("Backend is read-only: {0}")]
    ReadOnly(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Top-level error type for entiq.
#[derive(Debug, Error)]
pub enum EntiqError {
    /// Query construction failed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Entity assembly hit incomparable schemas.
    #[error("Schema conflict: {0}")]
    Conflict(#[from] SchemaConflict),

    /// A storage backend failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EntiqError {
    /// Returns true if this is a query validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an assembly schema conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Result type alias for entiq operations.
pub type EntiqResult<T> = Result<T, EntiqError>;
