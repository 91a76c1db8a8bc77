//! From-scratch HNSW graph, owned end-to-end by this crate.
//!
//! This exists instead of depending on an external HNSW crate because the
//! on-disk layout this segment must produce (`header.bin`, `data_level0.bin`,
//! `length.bin`, `link_lists.bin`, see `src/hnsw/persistence.rs`) is
//! hnswlib's own format, and a from-scratch graph that owns its vectors
//! outright avoids the self-referential-struct/unsafe lifetime-extension
//! dance that wrapping a borrowing third-party loader would require.

mod graph;
mod layer;
mod ordered_float;

pub(crate) use graph::{GraphSnapshot, NativeGraph};
pub use layer::Label;
