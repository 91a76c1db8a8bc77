//! Bounded linear-scan shadow index for the currently open batch (spec §4.2).
//!
//! This is what gives callers read-your-writes visibility before a batch
//! has been applied to the HNSW graph: every write lands here first, and
//! [`crate::query::QueryEngine`] always prefers a brute-force hit over a
//! stale HNSW one.

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Fixed-capacity `id -> vector` buffer with an explicit tombstone set.
#[derive(Debug)]
pub struct BruteForceIndex {
    capacity: usize,
    vectors: HashMap<String, Vec<f32>>,
    deleted: HashSet<String>,
}

impl BruteForceIndex {
    /// `capacity` should be the segment's configured `batch_size`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            vectors: HashMap::with_capacity(capacity),
            deleted: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.deleted.contains(id)
    }

    /// All ids currently holding an entry, tombstoned or not. Used by
    /// [`crate::query::QueryEngine::get`] to enumerate "every known id"
    /// when the caller doesn't name specific ids.
    pub fn vector_ids(&self) -> impl Iterator<Item = &str> {
        self.vectors.keys().map(String::as_str)
    }

    /// Overwrites an existing entry, or appends a new one if there's room.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchFull`] if `id` is new and the buffer is at
    /// capacity.
    pub fn upsert(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        if !self.vectors.contains_key(id) && self.vectors.len() >= self.capacity {
            return Err(Error::BatchFull {
                capacity: self.capacity,
            });
        }
        self.deleted.remove(id);
        self.vectors.insert(id.to_string(), vector);
        Ok(())
    }

    /// Records a tombstone for `id`. Idempotent.
    pub fn delete(&mut self, id: &str) {
        self.deleted.insert(id.to_string());
    }

    /// Exact k-NN over every non-tombstoned entry, optionally filtered by
    /// `allow_ids`, sorted by distance ascending with ties broken by
    /// smaller id lexicographically (spec §4.2).
    #[must_use]
    pub fn query(
        &self,
        metric: DistanceMetric,
        query: &[f32],
        k: usize,
        allow_ids: Option<&HashSet<String>>,
    ) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .filter(|(id, _)| !self.deleted.contains(id.as_str()))
            .filter(|(id, _)| allow_ids.is_none_or(|allowed| allowed.contains(id.as_str())))
            .map(|(id, vector)| (id.clone(), metric.distance(query, vector)))
            .collect();

        scored.sort_by(|(id_a, dist_a), (id_b, dist_b)| {
            dist_a
                .partial_cmp(dist_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| id_a.cmp(id_b))
        });
        scored.truncate(k);
        scored
    }

    /// Empties both the vector store and the tombstone set, after a
    /// successful apply (spec §4.4 step 7).
    pub fn clear(&mut self) {
        self.vectors.clear();
        self.deleted.clear();
    }
}

#[cfg(test)]
#[path = "brute_force_tests.rs"]
mod brute_force_tests;
