//! The batch/apply engine: spec §4.4, the heart of the core.
//!
//! [`BatchApplier`] owns only the bookkeeping for the currently open
//! [`Batch`] and the two cadence counters. It does not own `IdMaps`,
//! `BruteForceIndex`, or `HnswIndex` — those are composed by
//! [`crate::segment::Segment`], which already holds the single lock spec
//! §5 requires around all of them, and passes them in by reference so this
//! module stays a leaf with respect to ownership even though it is the
//! busiest piece of the core.

use crate::brute_force::BruteForceIndex;
use crate::error::{Error, Result};
use crate::hnsw::HnswIndex;
use crate::id_maps::{IdMaps, Label};
use crate::log::{LogRecord, Operation};
use std::collections::HashMap;
use tracing::warn;

/// A single id's pending state within the currently open batch.
#[derive(Debug, Clone)]
struct PendingWrite {
    vector: Vec<f32>,
    /// Whether this write needs a freshly reserved label at apply time —
    /// true for an id with no committed label yet (a first-time ADD, or an
    /// ADD/UPSERT reusing an id this same batch tombstoned).
    new_label: bool,
    offset: u64,
}

/// Bounded group of records buffered before commit (spec §4.4).
#[derive(Debug, Default)]
pub struct Batch {
    pub add_count: usize,
    pub update_count: usize,
    pub delete_count: usize,
    write_order: Vec<String>,
    pending_writes: HashMap<String, PendingWrite>,
    pending_deletes: std::collections::HashSet<String>,
    max_offset: Option<u64>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids currently holding a pending write, in the order they first
    /// appeared in this batch (spec §4.4 step 2's ordering requirement).
    #[must_use]
    pub fn written_ids(&self) -> &[String] {
        &self.write_order
    }

    /// Ids currently shadowed by a pending delete.
    #[must_use]
    pub fn deleted_ids(&self) -> &std::collections::HashSet<String> {
        &self.pending_deletes
    }

    /// Number of ids with a currently pending fresh (not-yet-labeled) write
    /// — the `pending_adds_in_batch` term of spec §3 invariant 2.
    #[must_use]
    pub fn pending_adds(&self) -> usize {
        self.pending_writes.values().filter(|w| w.new_label).count()
    }

    /// The `pending_deletes_in_batch` term of spec §3 invariant 2.
    #[must_use]
    pub fn pending_deletes(&self) -> usize {
        self.pending_deletes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_writes.is_empty() && self.pending_deletes.is_empty()
    }

    #[must_use]
    pub fn max_offset(&self) -> Option<u64> {
        self.max_offset
    }

    fn observe_offset(&mut self, offset: u64) {
        self.max_offset = Some(self.max_offset.map_or(offset, |current| current.max(offset)));
    }

    /// `retain_pending_delete` keeps this id in [`Self::deleted_ids`] even
    /// though it now also has a pending write — needed when the id being
    /// resurrected is already committed, so `apply()`'s delete step still
    /// evicts its old label before this write claims a fresh one. For a
    /// write whose prior delete (if any) was purely batch-local, callers
    /// pass `false` and the cancellation is free (nothing to evict).
    fn record_write(&mut self, id: &str, vector: Vec<f32>, offset: u64, new_label: bool, retain_pending_delete: bool) {
        if !self.pending_writes.contains_key(id) {
            self.write_order.push(id.to_string());
        }
        self.pending_writes
            .insert(id.to_string(), PendingWrite { vector, new_label, offset });
        if !retain_pending_delete {
            self.pending_deletes.remove(id);
        }
    }

    fn record_delete(&mut self, id: &str) {
        if self.pending_writes.remove(id).is_some() {
            self.write_order.retain(|written| written != id);
        }
        self.pending_deletes.insert(id.to_string());
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Outcome of a successful [`BatchApplier::apply`] call, for the caller
/// (the segment) to act on: update its watermark and decide whether to
/// persist.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOutcome {
    pub records_applied: usize,
    pub max_offset: Option<u64>,
    pub should_persist: bool,
}

/// Buffers records, routes them per spec §4.4's table, and commits batches
/// atomically to `IdMaps` + `HnswIndex`.
#[derive(Debug)]
pub struct BatchApplier {
    dim: Option<usize>,
    batch: Batch,
    batch_size: usize,
    sync_threshold: usize,
    records_since_last_batch: usize,
    records_since_last_persist: usize,
    invalid_operation_count: usize,
}

impl BatchApplier {
    #[must_use]
    pub fn new(batch_size: usize, sync_threshold: usize) -> Self {
        Self {
            dim: None,
            batch: Batch::new(),
            batch_size,
            sync_threshold,
            records_since_last_batch: 0,
            records_since_last_persist: 0,
            invalid_operation_count: 0,
        }
    }

    /// Restores `dim` after a crash, since it would otherwise only be
    /// learned again on the next successful write.
    pub fn set_recovered_dim(&mut self, dim: Option<usize>) {
        self.dim = dim;
    }

    #[must_use]
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    #[must_use]
    pub fn current_batch(&self) -> &Batch {
        &self.batch
    }

    #[must_use]
    pub fn invalid_operation_count(&self) -> usize {
        self.invalid_operation_count
    }

    #[must_use]
    pub fn is_apply_due(&self) -> bool {
        self.records_since_last_batch >= self.batch_size
    }

    /// Routes one record per spec §4.4's table, mutating the open batch and
    /// `bf` (the brute-force shadow). Rejects dimension mismatches and
    /// stale offsets before consulting the table, per spec §4.4's opening
    /// sentence; both are counted as invalid and otherwise ignored.
    ///
    /// When `bf` is at capacity for a genuinely new id, this forces an
    /// immediate `apply()` of the currently open batch and retries the
    /// write against the now-empty buffer, per spec.md's documented
    /// `BatchFull` behavior ("triggers an immediate apply rather than an
    /// error to the caller"). The `Some` case hands that apply's outcome
    /// back so the caller can fold it into its own watermark/persist
    /// bookkeeping exactly as it would a threshold-triggered one.
    ///
    /// # Errors
    ///
    /// Returns whatever the forced `apply()` surfaces.
    pub fn ingest(
        &mut self,
        record: LogRecord,
        max_applied_offset: Option<u64>,
        id_maps: &mut IdMaps,
        bf: &mut BruteForceIndex,
        hnsw: &HnswIndex,
    ) -> Result<Option<ApplyOutcome>> {
        if max_applied_offset.is_some_and(|watermark| record.offset <= watermark) {
            warn!(offset = record.offset, id = %record.id, "dropping record at or before watermark");
            self.invalid_operation_count += 1;
            self.records_since_last_batch += 1;
            return Ok(None);
        }

        if let Some(dim) = self.dim {
            if let Some(vector) = &record.embedding {
                if vector.len() != dim {
                    warn!(
                        id = %record.id,
                        expected = dim,
                        actual = vector.len(),
                        "dropping record with mismatched dimension"
                    );
                    self.invalid_operation_count += 1;
                    self.records_since_last_batch += 1;
                    return Ok(None);
                }
            }
        }

        let offset = record.offset;
        let known = id_maps.contains_id(&record.id) || self.batch.pending_writes.contains_key(&record.id);

        let forced = match record.operation {
            Operation::Add => self.route_add(record, known, id_maps, bf, hnsw)?,
            Operation::Update => self.route_update(record, known, id_maps, bf, hnsw)?,
            Operation::Upsert => self.route_upsert(record, known, id_maps, bf, hnsw)?,
            Operation::Delete => {
                self.route_delete(record, known, bf);
                None
            }
        };

        // Observed after routing (and any forced apply it just triggered)
        // so this offset always lands in whichever batch ends up open,
        // never in one a BatchFull-triggered apply just flushed.
        self.batch.observe_offset(offset);
        self.records_since_last_batch += 1;

        Ok(forced)
    }

    /// Attempts `bf.upsert`; on [`Error::BatchFull`] forces an immediate
    /// `apply()` of the batch open so far and retries against the
    /// now-cleared buffer, implementing spec.md's documented `BatchFull`
    /// behavior instead of surfacing it to the caller.
    fn upsert_with_retry(
        &mut self,
        id_maps: &mut IdMaps,
        bf: &mut BruteForceIndex,
        hnsw: &HnswIndex,
        id: &str,
        vector: Vec<f32>,
    ) -> Result<Option<ApplyOutcome>> {
        match bf.upsert(id, vector.clone()) {
            Ok(()) => Ok(None),
            Err(Error::BatchFull { .. }) => {
                warn!(id = %id, "brute-force buffer full, forcing an immediate apply");
                let outcome = self.apply(id_maps, bf, hnsw)?;
                bf.upsert(id, vector)?;
                Ok(Some(outcome))
            }
            Err(other) => Err(other),
        }
    }

    fn route_add(
        &mut self,
        record: LogRecord,
        known: bool,
        id_maps: &mut IdMaps,
        bf: &mut BruteForceIndex,
        hnsw: &HnswIndex,
    ) -> Result<Option<ApplyOutcome>> {
        let Some(vector) = record.embedding else {
            warn!(id = %record.id, "dropping ADD with no embedding");
            self.invalid_operation_count += 1;
            return Ok(None);
        };

        // A committed id that picked up a pending delete earlier in this
        // same batch is allowed to come back — original_source/chromadb's
        // local_persistent_hnsw.py only rejects ADD when the id exists *and*
        // isn't pending-delete. Only a genuine still-live duplicate drops.
        let pending_delete = self.batch.deleted_ids().contains(&record.id);
        if known && !pending_delete {
            warn!(id = %record.id, "dropping ADD for an id that already exists");
            self.invalid_operation_count += 1;
            return Ok(None);
        }

        let forced = self.upsert_with_retry(id_maps, bf, hnsw, &record.id, vector.clone())?;

        if self.dim.is_none() {
            self.dim = Some(vector.len());
        }
        // Only retain the pending delete when the id is actually committed:
        // apply()'s delete step then evicts its old label before this write
        // claims a fresh one. A batch-local-only resurrection has nothing
        // committed to evict, so canceling the delete here stays free.
        let retain_delete = pending_delete && id_maps.contains_id(&record.id);
        self.batch
            .record_write(&record.id, vector, record.offset, true, retain_delete);
        self.batch.add_count += 1;
        Ok(forced)
    }

    fn route_update(
        &mut self,
        record: LogRecord,
        known: bool,
        id_maps: &mut IdMaps,
        bf: &mut BruteForceIndex,
        hnsw: &HnswIndex,
    ) -> Result<Option<ApplyOutcome>> {
        if !known {
            warn!(id = %record.id, "dropping UPDATE for an unknown id");
            self.invalid_operation_count += 1;
            return Ok(None);
        }
        let Some(vector) = record.embedding else {
            // no vector supplied: spec table says this is a no-op drop.
            return Ok(None);
        };
        let forced = self.upsert_with_retry(id_maps, bf, hnsw, &record.id, vector.clone())?;
        self.batch.record_write(&record.id, vector, record.offset, false, false);
        self.batch.update_count += 1;
        Ok(forced)
    }

    fn route_upsert(
        &mut self,
        record: LogRecord,
        known: bool,
        id_maps: &mut IdMaps,
        bf: &mut BruteForceIndex,
        hnsw: &HnswIndex,
    ) -> Result<Option<ApplyOutcome>> {
        let Some(vector) = record.embedding else {
            warn!(id = %record.id, "dropping UPSERT with no embedding");
            self.invalid_operation_count += 1;
            return Ok(None);
        };
        let new_label = !known;
        let forced = self.upsert_with_retry(id_maps, bf, hnsw, &record.id, vector.clone())?;
        if self.dim.is_none() {
            self.dim = Some(vector.len());
        }
        self.batch.record_write(&record.id, vector, record.offset, new_label, false);
        if new_label {
            self.batch.add_count += 1;
        } else {
            self.batch.update_count += 1;
        }
        Ok(forced)
    }

    fn route_delete(&mut self, record: LogRecord, known: bool, bf: &mut BruteForceIndex) {
        if !known {
            warn!(id = %record.id, "dropping DELETE for an unknown id");
            self.invalid_operation_count += 1;
            return;
        }
        self.batch.record_delete(&record.id);
        self.batch.delete_count += 1;
        bf.delete(&record.id);
    }

    /// Commits the current batch to `id_maps` and `hnsw`, per spec §4.4
    /// steps 1–7. Leaves everything untouched and returns the error if
    /// `hnsw.add_items` fails; the batch is preserved for a retry.
    ///
    /// # Errors
    ///
    /// Returns whatever [`HnswIndex::ensure_capacity`]/`add_items` surface
    /// — `DimensionMismatch` or `CapacityExhausted` are the fatal cases
    /// spec §7 names.
    pub fn apply(&mut self, id_maps: &mut IdMaps, bf: &mut BruteForceIndex, hnsw: &HnswIndex) -> Result<ApplyOutcome> {
        if self.batch.is_empty() && self.batch.max_offset.is_none() {
            self.records_since_last_batch = 0;
            return Ok(ApplyOutcome {
                records_applied: 0,
                max_offset: None,
                should_persist: false,
            });
        }

        // Step 1: deletes first, so a delete-then-readd further down this
        // same batch (already resolved into the final pending state by
        // `ingest`) never fights over a label.
        for id in self.batch.deleted_ids().clone() {
            if let Some(label) = id_maps.label_for(&id) {
                hnsw.mark_deleted(label);
            }
            id_maps.remove(&id);
        }

        // Step 2: parallel (vectors[], labels[]) arrays, in first-appearance order.
        let mut fresh_reservations: Vec<(String, Label)> = Vec::new();
        let mut labels = Vec::with_capacity(self.batch.write_order.len());
        let mut vectors = Vec::with_capacity(self.batch.write_order.len());
        let mut next_label = id_maps.next_label();

        for id in &self.batch.write_order {
            let write = &self.batch.pending_writes[id];
            let label = if write.new_label {
                let label = next_label;
                next_label += 1;
                fresh_reservations.push((id.clone(), label));
                label
            } else {
                id_maps.require_label(id)?
            };
            labels.push(label);
            vectors.push(write.vector.clone());
        }

        // Step 3 + 4: grow then write, skipped entirely for a deletes-only
        // batch. Nothing is committed to id_maps until add_items succeeds,
        // per spec §4.4's "if step 4 fails, no mutation is visible."
        if let Some(dim) = vectors.first().map(Vec::len).or(self.dim) {
            hnsw.ensure_capacity(id_maps.len(), labels.len(), dim)?;
            hnsw.add_items(&labels, &vectors)?;
        }

        // Step 5: commit, now that HNSW accepted the write.
        let offsets: Vec<(String, u64)> = self
            .batch
            .write_order
            .iter()
            .map(|id| (id.clone(), self.batch.pending_writes[id].offset))
            .collect();
        id_maps.commit(&fresh_reservations, &offsets);

        let records_applied = self.batch.add_count + self.batch.update_count + self.batch.delete_count;
        let max_offset = self.batch.max_offset;

        // Step 6: cadence counters.
        self.records_since_last_batch = 0;
        self.records_since_last_persist += records_applied;
        let should_persist = self.records_since_last_persist >= self.sync_threshold;
        if should_persist {
            self.records_since_last_persist = 0;
        }

        // Step 7: fresh batch, clear the brute-force shadow.
        self.clear_batch_state();
        bf.clear();

        Ok(ApplyOutcome {
            records_applied,
            max_offset,
            should_persist,
        })
    }

    fn clear_batch_state(&mut self) {
        self.batch.clear();
    }
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod batch_tests;
