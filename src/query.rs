//! Answers `get`/`query` by merging the brute-force shadow with the HNSW
//! graph (spec §4.6). Stateless: every call borrows the three components it
//! needs from [`crate::segment::Segment`], which holds them under its one
//! lock for the duration.

use crate::brute_force::BruteForceIndex;
use crate::distance::DistanceMetric;
use crate::hnsw::HnswIndex;
use crate::id_maps::IdMaps;
use std::collections::HashSet;

/// Leaf-level merge logic; holds no state of its own.
pub struct QueryEngine;

impl QueryEngine {
    /// **get(ids?)**: returns vectors in request order (or, when `ids` is
    /// `None`, every id currently known to either layer). Lookup priority
    /// per id: brute-force entry (unless tombstoned) → HNSW by label →
    /// absent. Absent and in-batch-tombstoned ids are omitted, not
    /// returned as nulls.
    #[must_use]
    pub fn get(
        ids: Option<&[String]>,
        id_maps: &IdMaps,
        bf: &BruteForceIndex,
        hnsw: &HnswIndex,
    ) -> Vec<(String, Vec<f32>)> {
        let candidate_ids: Vec<String> = match ids {
            Some(list) => list.to_vec(),
            None => {
                let mut all: HashSet<String> = id_maps.id_to_label_map().keys().cloned().collect();
                all.extend(bf.vector_ids().map(str::to_string));
                all.into_iter().collect()
            }
        };

        candidate_ids
            .into_iter()
            .filter_map(|id| Self::resolve_one(&id, id_maps, bf, hnsw).map(|vector| (id, vector)))
            .collect()
    }

    fn resolve_one(id: &str, id_maps: &IdMaps, bf: &BruteForceIndex, hnsw: &HnswIndex) -> Option<Vec<f32>> {
        if bf.is_deleted(id) {
            return None;
        }
        if let Some(vector) = bf.get(id) {
            return Some(vector.to_vec());
        }
        let label = id_maps.label_for(id)?;
        hnsw.get_items(&[label]).into_iter().next().flatten()
    }

    /// **query(vecs, k, allow_ids?)**: the five-step merge spec §4.6
    /// describes, run for a single query vector. `live_count` is the
    /// segment's current `count()`; `update_count_in_batch` and
    /// `delete_count_in_batch` are the open batch's pending counters, used
    /// only to size the HNSW over-query margin.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn query(
        metric: DistanceMetric,
        query_vector: &[f32],
        k: usize,
        allow_ids: Option<&HashSet<String>>,
        live_count: usize,
        update_count_in_batch: usize,
        delete_count_in_batch: usize,
        batch_tombstoned_ids: &HashSet<String>,
        id_maps: &IdMaps,
        bf: &BruteForceIndex,
        hnsw: &HnswIndex,
    ) -> Vec<(String, f32)> {
        // Step 1.
        let k = k.min(live_count);
        if k == 0 {
            return Vec::new();
        }

        // Step 2: over-query HNSW to compensate for ids the open batch
        // supersedes; HnswIndex::knn itself clamps to its live label count.
        let over_query = k + update_count_in_batch + delete_count_in_batch;
        let allow_labels: Option<HashSet<_>> =
            allow_ids.map(|ids| ids.iter().filter_map(|id| id_maps.label_for(id)).collect());
        let hnsw_hits = hnsw.knn(query_vector, over_query, allow_labels.as_ref());
        let mut hnsw_results: Vec<(String, f32)> = hnsw_hits
            .into_iter()
            .filter_map(|(label, distance)| id_maps.id_for(label).map(|id| (id.to_string(), distance)))
            .collect();

        // Step 3: brute-force query over the same allow-list. Bounded by
        // bf's own size rather than k, since step 5 needs every candidate
        // to merge correctly before truncating.
        let bf_results = bf.query(metric, query_vector, bf.len(), allow_ids);
        let bf_ids: HashSet<&str> = bf_results.iter().map(|(id, _)| id.as_str()).collect();

        // Step 4: drop HNSW hits shadowed by the open batch.
        hnsw_results.retain(|(id, _)| !batch_tombstoned_ids.contains(id) && !bf_ids.contains(id.as_str()));

        // Step 5: merge two already-sorted sequences, tie-break by id.
        merge_sorted(bf_results, hnsw_results, k)
    }
}

fn merge_sorted(a: Vec<(String, f32)>, b: Vec<(String, f32)>, k: usize) -> Vec<(String, f32)> {
    let mut merged = Vec::with_capacity(k);
    let mut left = a.into_iter().peekable();
    let mut right = b.into_iter().peekable();

    while merged.len() < k {
        match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => {
                let take_left = match l.1.partial_cmp(&r.1).unwrap_or(std::cmp::Ordering::Equal) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal => l.0 <= r.0,
                };
                merged.push(if take_left { left.next().unwrap() } else { right.next().unwrap() });
            }
            (Some(_), None) => merged.push(left.next().unwrap()),
            (None, Some(_)) => merged.push(right.next().unwrap()),
            (None, None) => break,
        }
    }
    merged
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod query_tests;
