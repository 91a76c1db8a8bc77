//! # vecsegment
//!
//! Per-collection vector segment: a layered index combining a bounded
//! write-buffer (brute-force, exact) with a persistent HNSW graph, coordinated
//! by a batch/apply engine so writers see their own writes immediately while
//! the graph is only touched in amortized batches.
//!
//! A segment owns one distance metric and one dimension (fixed at the first
//! successful write) for its whole lifetime. Callers drive it through a small
//! state machine — `Created` → `Opened`/created → `Running` → `Closed` — by
//! calling [`Segment::ingest`] for writes and [`Segment::query_vectors`] /
//! [`Segment::get_vectors`] for reads.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use vecsegment::{LogRecord, Operation, Segment, SegmentConfig};
//!
//! let config = SegmentConfig {
//!     persist_directory: "./segments".to_string(),
//!     ..SegmentConfig::default()
//! };
//! let segment = Segment::create("docs", config)?;
//!
//! segment.ingest(LogRecord {
//!     offset: 1,
//!     id: "doc-1".to_string(),
//!     operation: Operation::Add,
//!     embedding: Some(vec![0.1, 0.2, 0.3]),
//! })?;
//!
//! let hits = segment.query_vectors(&[vec![0.1, 0.2, 0.3]], 5, None, false);
//! # Ok::<(), vecsegment::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod brute_force;
pub mod config;
pub mod distance;
pub mod error;
pub mod hnsw;
pub mod id_maps;
pub mod log;
pub mod persistor;
pub mod query;
pub mod segment;

pub use config::{ConfigError, SegmentConfig};
pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use id_maps::Label;
pub use log::{LogRecord, Operation};
pub use segment::{Segment, SegmentState};
