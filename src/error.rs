//! Error types for the vector segment engine.
//!
//! A single error type covers both infrastructure failures (I/O, corruption)
//! and the handful of fatal conditions an apply can raise. Per-record
//! malformed input (duplicate id, unknown id, dimension mismatch) is logged
//! and counted by the batch applier rather than returned here, but the
//! variants still exist because the components that detect them need a type
//! to report through before the applier decides whether to swallow it.

use thiserror::Error;

/// Result type alias for segment operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating a vector segment.
///
/// Error codes follow the pattern `SEG-XXX` for easy log correlation.
#[derive(Error, Debug)]
pub enum Error {
    /// Vector length did not match the segment's established `dim` (SEG-001).
    #[error("[SEG-001] vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension fixed at first insert.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// The brute-force buffer is at capacity and the incoming id is new (SEG-002).
    #[error("[SEG-002] brute-force batch is full (capacity {capacity})")]
    BatchFull {
        /// Configured `batch_size`.
        capacity: usize,
    },

    /// Lookup or mutation referenced an id with no label assigned (SEG-003).
    #[error("[SEG-003] unknown id '{0}'")]
    UnknownId(String),

    /// An ADD targeted an id that already has a label (SEG-004).
    #[error("[SEG-004] duplicate id '{0}'")]
    DuplicateId(String),

    /// HNSW resize failed to accommodate the incoming records (SEG-005).
    #[error("[SEG-005] capacity exhausted: could not grow past {attempted}")]
    CapacityExhausted {
        /// Capacity the resize attempted to reach.
        attempted: usize,
    },

    /// I/O error while writing a graph page or the metadata snapshot (SEG-006).
    #[error("[SEG-006] persistence failure: {0}")]
    PersistenceFailure(String),

    /// A write or query was attempted against a closed segment (SEG-007).
    #[error("[SEG-007] segment is stopped and cannot accept this operation")]
    StoppedComponent,

    /// `reset_state()` was called without `allow_reset` enabled (SEG-008).
    #[error("[SEG-008] reset_state() forbidden: allow_reset is not set")]
    ResetForbidden,

    /// Underlying filesystem error (SEG-009).
    #[error("[SEG-009] io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot or graph file could not be encoded/decoded (SEG-010).
    #[error("[SEG-010] serialization error: {0}")]
    Serialization(String),

    /// Invariant violation that should be impossible under correct usage (SEG-011).
    #[error("[SEG-011] internal error: {0}")]
    Internal(String),

    /// On-disk snapshot or graph file carries a version this build does not understand (SEG-012).
    #[error("[SEG-012] unsupported snapshot version {found} (expected {expected})")]
    UnsupportedSnapshotVersion {
        /// Version this build knows how to read.
        expected: u32,
        /// Version found in the file's header.
        found: u32,
    },

    /// Segment configuration failed validation (SEG-013).
    #[error("[SEG-013] invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Returns the error code (e.g., "SEG-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "SEG-001",
            Self::BatchFull { .. } => "SEG-002",
            Self::UnknownId(_) => "SEG-003",
            Self::DuplicateId(_) => "SEG-004",
            Self::CapacityExhausted { .. } => "SEG-005",
            Self::PersistenceFailure(_) => "SEG-006",
            Self::StoppedComponent => "SEG-007",
            Self::ResetForbidden => "SEG-008",
            Self::Io(_) => "SEG-009",
            Self::Serialization(_) => "SEG-010",
            Self::Internal(_) => "SEG-011",
            Self::UnsupportedSnapshotVersion { .. } => "SEG-012",
            Self::Config(_) => "SEG-013",
        }
    }

    /// Returns true for malformed-record outcomes the applier is expected to
    /// log and count rather than propagate as a failed apply.
    #[must_use]
    pub const fn is_per_record(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::UnknownId(_) | Self::DuplicateId(_)
        )
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
