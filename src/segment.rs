//! The top-level composition: wires `IdMaps`, `BruteForceIndex`,
//! `HnswIndex`, `BatchApplier`, `Persistor`, and `QueryEngine` behind the
//! single lock spec §5 requires, and drives the `Created → Opened →
//! Running → Closed` state machine (spec §4.6).

use crate::batch::{ApplyOutcome, BatchApplier};
use crate::brute_force::BruteForceIndex;
use crate::config::SegmentConfig;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::hnsw::{HnswIndex, HnswParams};
use crate::id_maps::IdMaps;
use crate::log::LogRecord;
use crate::persistor::Persistor;
use crate::query::QueryEngine;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{error, info};

/// File handles a single open segment consumes: 4 HNSW graph files + 1
/// metadata sidecar (spec §5; SPEC_FULL supplemented feature 1).
pub const FILE_HANDLE_COUNT: usize = 5;

/// Lifecycle states (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Created,
    Opened,
    Running,
    Closed,
}

/// Everything the segment's single lock guards: the id maps, the
/// brute-force shadow, the batch applier, and the watermark. `HnswIndex`
/// lives outside this lock because it does its own fine-grained locking
/// internally (spec §5: "the writer side" is what this lock serializes,
/// not HNSW's own read concurrency for search).
struct SegmentCore {
    id_maps: IdMaps,
    bf: BruteForceIndex,
    applier: BatchApplier,
    max_applied_offset: Option<u64>,
}

/// A single collection's vector segment.
pub struct Segment {
    segment_id: String,
    metric: DistanceMetric,
    config: SegmentConfig,
    core: RwLock<SegmentCore>,
    hnsw: HnswIndex,
    persistor: Persistor,
    state: RwLock<SegmentState>,
}

impl Segment {
    /// Fixed file handle budget per open segment (supplemented feature 1);
    /// callers size their segment cache to `fd_limit / file_handle_count()`.
    #[must_use]
    pub const fn file_handle_count() -> usize {
        FILE_HANDLE_COUNT
    }

    /// Creates a brand-new, empty segment. Fails validation the same way
    /// [`SegmentConfig::validate`] would.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid.
    pub fn create(segment_id: impl Into<String>, config: SegmentConfig) -> Result<Self> {
        config.validate().map_err(|e| Error::Config(e.to_string()))?;
        let metric = config.distance_metric().map_err(|e| Error::Config(e.to_string()))?;
        let segment_id = segment_id.into();
        let dir = PathBuf::from(&config.persist_directory).join(&segment_id);

        Ok(Self {
            hnsw: HnswIndex::new(metric, HnswParams::from_config(&config), dir.clone()),
            persistor: Persistor::new(dir),
            core: RwLock::new(SegmentCore {
                id_maps: IdMaps::new(),
                bf: BruteForceIndex::new(config.batch_size),
                applier: BatchApplier::new(config.batch_size, config.sync_threshold),
                max_applied_offset: None,
            }),
            state: RwLock::new(SegmentState::Created),
            segment_id,
            metric,
            config,
        })
    }

    /// Opens a segment, recovering persisted state if present (spec §4.5
    /// recovery). Falls back to an empty segment if nothing was ever
    /// persisted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid config, or whatever
    /// [`Persistor::load`]/[`HnswIndex::open`] surface for a corrupt or
    /// unreadable on-disk state.
    pub fn open(segment_id: impl Into<String>, config: SegmentConfig) -> Result<Self> {
        config.validate().map_err(|e| Error::Config(e.to_string()))?;
        let metric = config.distance_metric().map_err(|e| Error::Config(e.to_string()))?;
        let segment_id = segment_id.into();
        let dir = PathBuf::from(&config.persist_directory).join(&segment_id);
        let persistor = Persistor::new(dir.clone());

        let snapshot = persistor.load()?;
        let hnsw = HnswIndex::open(metric, HnswParams::from_config(&config), dir)?;

        let mut applier = BatchApplier::new(config.batch_size, config.sync_threshold);
        let (id_maps, max_applied_offset) = match snapshot {
            Some(snap) => {
                applier.set_recovered_dim(snap.dim);
                if !snap.id_to_label.is_empty() {
                    if let Some(dim) = snap.dim {
                        // spec §4.5 recovery step 2: grow to max(count * resize_factor, default).
                        hnsw.ensure_capacity(0, snap.id_to_label.len(), dim)?;
                    }
                    hnsw.open_files();
                }
                (IdMaps::from_parts(snap.id_to_label, snap.id_to_offset, snap.next_label), snap.max_applied_offset)
            }
            None => (IdMaps::new(), None),
        };

        info!(segment_id = %segment_id, recovered_count = id_maps.len(), "segment opened");

        Ok(Self {
            hnsw,
            persistor,
            core: RwLock::new(SegmentCore {
                id_maps,
                bf: BruteForceIndex::new(config.batch_size),
                applier,
                max_applied_offset,
            }),
            state: RwLock::new(SegmentState::Opened),
            segment_id,
            metric,
            config,
        })
    }

    #[must_use]
    pub fn segment_id(&self) -> &str {
        &self.segment_id
    }

    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    #[must_use]
    pub fn state(&self) -> SegmentState {
        *self.state.read()
    }

    /// `Opened → Running` transition, idempotent, fired on first log
    /// subscription (spec §4.6).
    pub fn start(&self) {
        let mut state = self.state.write();
        if *state == SegmentState::Opened {
            *state = SegmentState::Running;
        }
    }

    /// The offset a resumed log subscription should start from (spec §4.5
    /// recovery step 3).
    #[must_use]
    pub fn resume_offset(&self, log_floor: u64) -> u64 {
        crate::log::LogConsumer::resume_offset(self.core.read().max_applied_offset, log_floor)
    }

    /// Routes one record through the batch applier, applying the open
    /// batch and persisting when their respective thresholds are crossed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoppedComponent`] if the segment is closed, or
    /// whatever [`BatchApplier::apply`]/[`Persistor::persist`] surface for
    /// a fatal apply/persist failure. On error the batch is left intact.
    pub fn ingest(&self, record: LogRecord) -> Result<()> {
        if self.state() == SegmentState::Closed {
            return Err(Error::StoppedComponent);
        }

        let mut core = self.core.write();
        let SegmentCore {
            id_maps,
            bf,
            applier,
            max_applied_offset,
        } = &mut *core;

        if let Some(outcome) = applier.ingest(record, *max_applied_offset, id_maps, bf, &self.hnsw)? {
            // The brute-force buffer filled mid-ingest and the applier
            // already forced its own apply (spec.md's documented
            // `BatchFull` behavior); fold that outcome in exactly as we
            // would a threshold-triggered one.
            self.finish_apply(outcome, id_maps, applier, max_applied_offset)?;
        }

        if applier.is_apply_due() {
            self.apply_and_maybe_persist(id_maps, bf, applier, max_applied_offset)?;
        }
        Ok(())
    }

    fn apply_and_maybe_persist(
        &self,
        id_maps: &mut IdMaps,
        bf: &mut BruteForceIndex,
        applier: &mut BatchApplier,
        max_applied_offset: &mut Option<u64>,
    ) -> Result<()> {
        let outcome = match applier.apply(id_maps, bf, &self.hnsw) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(segment_id = %self.segment_id, error = %err, "apply failed, batch preserved");
                return Err(err);
            }
        };
        self.finish_apply(outcome, id_maps, applier, max_applied_offset)
    }

    fn finish_apply(
        &self,
        outcome: ApplyOutcome,
        id_maps: &IdMaps,
        applier: &BatchApplier,
        max_applied_offset: &mut Option<u64>,
    ) -> Result<()> {
        if let Some(offset) = outcome.max_offset {
            *max_applied_offset = Some(max_applied_offset.map_or(offset, |current| current.max(offset)));
        }
        info!(
            segment_id = %self.segment_id,
            records_applied = outcome.records_applied,
            "batch applied"
        );

        if outcome.should_persist {
            self.persistor.persist(&self.hnsw, id_maps, *max_applied_offset, applier.dim())?;
        }
        Ok(())
    }

    /// `count()` (spec §3 invariant 2).
    #[must_use]
    pub fn count(&self) -> usize {
        Self::count_locked(&self.core.read())
    }

    fn count_locked(core: &SegmentCore) -> usize {
        let batch = core.applier.current_batch();
        (core.id_maps.len() + batch.pending_adds()).saturating_sub(batch.pending_deletes())
    }

    #[must_use]
    pub fn max_applied_offset(&self) -> u64 {
        self.core.read().max_applied_offset.unwrap_or(0)
    }

    #[must_use]
    pub fn invalid_operation_count(&self) -> usize {
        self.core.read().applier.invalid_operation_count()
    }

    /// `get_vectors(ids?)`.
    #[must_use]
    pub fn get_vectors(&self, ids: Option<&[String]>) -> Vec<(String, Vec<f32>)> {
        let core = self.core.read();
        QueryEngine::get(ids, &core.id_maps, &core.bf, &self.hnsw)
    }

    /// `query_vectors(vecs, k, allow_ids?, include_embeddings?)`.
    #[must_use]
    pub fn query_vectors(
        &self,
        vectors: &[Vec<f32>],
        k: usize,
        allow_ids: Option<&HashSet<String>>,
        include_embeddings: bool,
    ) -> Vec<Vec<(String, f32, Option<Vec<f32>>)>> {
        let core = self.core.read();
        let batch = core.applier.current_batch();
        let live = Self::count_locked(&core);

        vectors
            .iter()
            .map(|query_vector| {
                let hits = QueryEngine::query(
                    self.metric,
                    query_vector,
                    k,
                    allow_ids,
                    live,
                    batch.update_count,
                    batch.delete_count,
                    batch.deleted_ids(),
                    &core.id_maps,
                    &core.bf,
                    &self.hnsw,
                );
                hits.into_iter()
                    .map(|(id, distance)| {
                        let embedding = include_embeddings
                            .then(|| QueryEngine::get(Some(std::slice::from_ref(&id)), &core.id_maps, &core.bf, &self.hnsw))
                            .and_then(|mut found| found.pop().map(|(_, vector)| vector));
                        (id, distance, embedding)
                    })
                    .collect()
            })
            .collect()
    }

    /// `Running → Closed`, idempotent: flushes the open batch (even if
    /// below `batch_size`) and persists before releasing HNSW's file
    /// handles.
    ///
    /// # Errors
    ///
    /// Returns whatever the final flush/persist surfaces.
    pub fn close(&self) -> Result<()> {
        if self.state() == SegmentState::Closed {
            return Ok(());
        }

        let mut core = self.core.write();
        let SegmentCore {
            id_maps,
            bf,
            applier,
            max_applied_offset,
        } = &mut *core;

        if !applier.current_batch().is_empty() {
            self.apply_and_maybe_persist(id_maps, bf, applier, max_applied_offset)?;
        }
        self.persistor.persist(&self.hnsw, id_maps, *max_applied_offset, applier.dim())?;
        self.hnsw.close_files();

        *self.state.write() = SegmentState::Closed;
        info!(segment_id = %self.segment_id, "segment closed");
        Ok(())
    }

    /// Removes the segment directory entirely. Only permitted once closed
    /// (spec §4.6).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoppedComponent`] if the segment isn't closed, or
    /// an I/O error from [`Persistor::delete`].
    pub fn delete(&self) -> Result<()> {
        if self.state() != SegmentState::Closed {
            return Err(Error::StoppedComponent);
        }
        self.persistor.delete()
    }

    /// Alias of [`Self::delete`], gated by `allow_reset` (spec §4.5).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResetForbidden`] if `allow_reset` is unset,
    /// otherwise whatever [`Self::delete`] returns.
    pub fn reset_state(&self) -> Result<()> {
        if !self.config.allow_reset {
            return Err(Error::ResetForbidden);
        }
        self.delete()
    }
}

#[cfg(test)]
#[path = "segment_tests.rs"]
mod segment_tests;
