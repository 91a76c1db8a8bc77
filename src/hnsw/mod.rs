//! Persistent approximate k-NN graph addressed by integer label (spec §4.3).
//!
//! `HnswIndex` owns a [`native::NativeGraph`] behind a lock, created lazily:
//! the graph doesn't exist until the first successful `ensure_capacity`
//! call, which is also what fixes `dim` for the segment (spec §4.4 step 3).
//! Persistence writes exactly the four files named in spec §6; see
//! `persistence.rs`.

mod native;
mod params;
mod persistence;

pub use native::Label;
pub use params::{HnswParams, DEFAULT_CAPACITY};
pub use persistence::GRAPH_FILE_NAMES;

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use native::NativeGraph;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Wraps the native graph with the lazy-dim-fixing and file-handle
/// bookkeeping spec §4.3/§9 (supplemented feature 2) describe.
pub struct HnswIndex {
    metric: DistanceMetric,
    params: HnswParams,
    persist_dir: PathBuf,
    inner: RwLock<Option<NativeGraph>>,
    files_open: AtomicBool,
}

impl HnswIndex {
    /// Creates an index with no graph yet; `dim` is fixed by the first
    /// `ensure_capacity` call.
    #[must_use]
    pub fn new(metric: DistanceMetric, params: HnswParams, persist_dir: PathBuf) -> Self {
        Self {
            metric,
            params,
            persist_dir,
            inner: RwLock::new(None),
            files_open: AtomicBool::new(false),
        }
    }

    /// Recovers a graph from `persist_dir` if the four graph files are
    /// present there, per spec §4.5 recovery step 2.
    ///
    /// # Errors
    ///
    /// Returns an error if the files exist but are corrupt or carry an
    /// unsupported format version.
    pub fn open(metric: DistanceMetric, params: HnswParams, persist_dir: PathBuf) -> Result<Self> {
        let loaded = persistence::load(&persist_dir, metric)?;
        let files_open = loaded.is_some();
        Ok(Self {
            metric,
            params,
            persist_dir,
            inner: RwLock::new(loaded),
            files_open: AtomicBool::new(files_open),
        })
    }

    /// Fixed dimension once established, or `None` before the first insert.
    pub fn dim(&self) -> Option<usize> {
        self.inner.read().as_ref().map(NativeGraph::dim)
    }

    /// Live (non-tombstoned, occupied) label count.
    pub fn live_count(&self) -> usize {
        self.inner.read().as_ref().map_or(0, NativeGraph::live_count)
    }

    /// Grows the graph to accommodate `applied_count + incoming` labels,
    /// initializing it (and fixing `dim`) on first call. Growth formula per
    /// spec §4.3: `max((applied_count + incoming) * resize_factor, default)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `dim` differs from what was
    /// already fixed, or [`Error::CapacityExhausted`] if the allocation for
    /// the new capacity fails.
    pub fn ensure_capacity(&self, applied_count: usize, incoming: usize, dim: usize) -> Result<()> {
        let mut inner = self.inner.write();

        let Some(graph) = inner.as_ref() else {
            let capacity = Self::grown_capacity(incoming, self.params.resize_factor);
            *inner = Some(NativeGraph::new(
                self.metric,
                dim,
                self.params.m,
                self.params.ef_construction,
                capacity,
            ));
            return Ok(());
        };

        if graph.dim() != dim {
            return Err(Error::DimensionMismatch {
                expected: graph.dim(),
                actual: dim,
            });
        }

        let needed = applied_count + incoming;
        if needed > graph.capacity() {
            let new_capacity = Self::grown_capacity(needed, self.params.resize_factor);
            graph
                .try_resize(new_capacity)
                .map_err(|()| Error::CapacityExhausted {
                    attempted: new_capacity,
                })?;
        }

        Ok(())
    }

    fn grown_capacity(needed: usize, resize_factor: f32) -> usize {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let grown = (needed as f32 * resize_factor).ceil() as usize;
        grown.max(DEFAULT_CAPACITY)
    }

    /// Adds `labels[i] -> vectors[i]` to the graph. `ensure_capacity` must
    /// have been called first; every label must be fresh (or previously
    /// tombstoned, which this overwrites).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the graph has not been initialized,
    /// or [`Error::DimensionMismatch`] if any vector's length differs from
    /// the fixed `dim`.
    pub fn add_items(&self, labels: &[Label], vectors: &[Vec<f32>]) -> Result<()> {
        let inner = self.inner.read();
        let Some(graph) = inner.as_ref() else {
            return Err(Error::Internal(
                "add_items called before ensure_capacity initialized the graph".to_string(),
            ));
        };

        for vector in vectors {
            if vector.len() != graph.dim() {
                return Err(Error::DimensionMismatch {
                    expected: graph.dim(),
                    actual: vector.len(),
                });
            }
        }

        for (&label, vector) in labels.iter().zip(vectors) {
            graph.insert(label, vector.clone());
        }
        Ok(())
    }

    /// Tombstones `label`. Idempotent; a no-op if the graph doesn't exist
    /// yet or the label was never occupied.
    pub fn mark_deleted(&self, label: Label) {
        if let Some(graph) = self.inner.read().as_ref() {
            graph.mark_deleted(label);
        }
    }

    /// Approximate k-NN search, `k` clamped to the live label count.
    pub fn knn(&self, query: &[f32], k: usize, filter: Option<&HashSet<Label>>) -> Vec<(Label, f32)> {
        let inner = self.inner.read();
        let Some(graph) = inner.as_ref() else {
            return Vec::new();
        };
        let k = k.min(graph.live_count());
        graph.search(query, k, self.params.ef_search, filter)
    }

    /// Returns the stored vector for each requested label, `None` where
    /// absent or tombstoned.
    pub fn get_items(&self, labels: &[Label]) -> Vec<Option<Vec<f32>>> {
        let inner = self.inner.read();
        let Some(graph) = inner.as_ref() else {
            return vec![None; labels.len()];
        };
        labels.iter().map(|&label| graph.get_item(label)).collect()
    }

    /// Flushes the graph to its four files under `persist_dir`, per spec
    /// §4.5's `persist()` step 1. A no-op if the graph was never
    /// initialized (nothing to flush for an empty segment).
    ///
    /// # Errors
    ///
    /// Returns [`Error::PersistenceFailure`] on any I/O error.
    pub fn persist_dirty(&self) -> Result<()> {
        let inner = self.inner.read();
        let Some(graph) = inner.as_ref() else {
            return Ok(());
        };
        std::fs::create_dir_all(&self.persist_dir).map_err(|e| Error::PersistenceFailure(e.to_string()))?;
        persistence::save(&self.persist_dir, graph)?;
        info!(live_count = graph.live_count(), "hnsw graph persisted");
        Ok(())
    }

    /// Acquires the backing file handles (spec §4.3, supplemented feature 2).
    /// This implementation reads the graph files fully into memory rather
    /// than memory-mapping them, so there are no handles to actually hold
    /// open; this method exists so the segment's start/stop lifecycle has
    /// the hook spec §9's recovery step 2 expects.
    pub fn open_files(&self) {
        self.files_open.store(true, Ordering::Relaxed);
    }

    /// Releases the backing file handles. Idempotent.
    pub fn close_files(&self) {
        self.files_open.store(false, Ordering::Relaxed);
    }

    /// Whether `open_files` has been called without a matching `close_files`.
    pub fn files_open(&self) -> bool {
        self.files_open.load(Ordering::Relaxed)
    }

    /// Directory this index persists its graph files under.
    pub fn persist_dir(&self) -> &Path {
        &self.persist_dir
    }
}
