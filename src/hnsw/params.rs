//! HNSW construction and search parameters.
//!
//! Frozen at segment creation (spec §4.3): `space`, `M`, `ef_construction`,
//! `ef_search`, `num_threads`, `resize_factor`, and the initial capacity are
//! all fixed for the life of the segment. There is deliberately no
//! `HnswParams::auto` dimension-tiering helper here — the teacher's original
//! version of that picked defaults for a tunable ANN index serving many
//! workloads; this segment takes every one of these values from
//! [`crate::config::SegmentConfig`] instead, because spec §6 requires them
//! to be explicit, enumerated config fields rather than inferred.

/// Default capacity a freshly-initialized graph is sized to when the first
/// batch committing to it is smaller than this (spec §4.3).
pub const DEFAULT_CAPACITY: usize = 1000;

/// HNSW parameters pinned at segment creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HnswParams {
    /// Bidirectional links per node at layers above 0 (`M0` is `2*m`).
    pub m: usize,
    /// Candidate pool size used while building the graph.
    pub ef_construction: usize,
    /// Candidate pool size used while searching the graph.
    pub ef_search: usize,
    /// Worker threads available to HNSW for neighbor search.
    pub num_threads: usize,
    /// Growth multiplier applied when the graph must resize.
    pub resize_factor: f32,
}

impl HnswParams {
    /// Builds params from a validated [`crate::config::SegmentConfig`].
    #[must_use]
    pub fn from_config(config: &crate::config::SegmentConfig) -> Self {
        Self {
            m: config.m,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search,
            num_threads: config.num_threads,
            resize_factor: config.resize_factor,
        }
    }
}
