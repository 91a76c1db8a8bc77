//! Native HNSW graph.
//!
//! Implements the hierarchical navigable small-world structure from Malkov
//! & Yashunin, "Efficient and robust approximate nearest neighbor search
//! using Hierarchical Navigable Small World graphs" (<https://arxiv.org/abs/1603.09320>),
//! addressed by the caller's integer label rather than a graph-assigned
//! node id — label assignment is [`crate::id_maps::IdMaps`]'s job, not the
//! graph's. Deletion is a tombstone: [`NativeGraph::mark_deleted`] excludes
//! a label from results but leaves its edges in place, since removing a
//! node from a navigable small-world graph mid-flight can disconnect its
//! neighborhood.

use super::layer::{Label, Layer};
use super::ordered_float::OrderedDistance;
use crate::distance::DistanceMetric;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// A graph position that hasn't been written to yet.
const EMPTY_SLOT: Option<Vec<f32>> = None;

/// Owned, flat snapshot of a [`NativeGraph`]'s state, independent of the
/// graph's internal lock structure — what `src/hnsw/persistence.rs` reads
/// from and writes to disk.
pub(crate) struct GraphSnapshot {
    pub(crate) dim: usize,
    pub(crate) m: usize,
    pub(crate) ef_construction: usize,
    pub(crate) capacity: usize,
    pub(crate) entry_point: Option<Label>,
    pub(crate) max_layer: usize,
    pub(crate) vectors: Vec<Option<Vec<f32>>>,
    pub(crate) deleted: FxHashSet<Label>,
    /// Per layer, per label, that label's neighbor list in that layer.
    pub(crate) layers: Vec<Vec<Vec<Label>>>,
}

/// The native HNSW graph. Owns every vector it indexes (no memory-mapping,
/// no borrowed data) so it carries no self-referential lifetime and can be
/// freely persisted and reloaded — see `src/hnsw/persistence.rs`.
#[derive(Debug)]
pub struct NativeGraph {
    metric: DistanceMetric,
    dim: usize,
    vectors: RwLock<Vec<Option<Vec<f32>>>>,
    layers: RwLock<Vec<Layer>>,
    deleted: RwLock<FxHashSet<Label>>,
    entry_point: RwLock<Option<Label>>,
    max_layer: AtomicUsize,
    live_count: AtomicUsize,
    rng_state: AtomicU64,
    m: usize,
    m0: usize,
    ef_construction: usize,
    level_mult: f64,
}

impl NativeGraph {
    /// Creates an empty graph pre-sized for `capacity` labels.
    pub(crate) fn new(
        metric: DistanceMetric,
        dim: usize,
        m: usize,
        ef_construction: usize,
        capacity: usize,
    ) -> Self {
        Self {
            metric,
            dim,
            vectors: RwLock::new(vec![EMPTY_SLOT; capacity]),
            layers: RwLock::new(vec![Layer::new(capacity)]),
            deleted: RwLock::new(FxHashSet::default()),
            entry_point: RwLock::new(None),
            max_layer: AtomicUsize::new(0),
            live_count: AtomicUsize::new(0),
            rng_state: AtomicU64::new(0x5DEE_CE66_D1A4_B5B5),
            m,
            m0: m * 2,
            ef_construction,
            level_mult: 1.0 / (m as f64).ln(),
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.dim
    }

    /// Number of labels visible to search: occupied and not tombstoned.
    pub(crate) fn live_count(&self) -> usize {
        self.live_count.load(Ordering::Relaxed)
    }

    /// Number of label slots currently allocated.
    pub(crate) fn capacity(&self) -> usize {
        self.vectors.read().len()
    }

    /// Grows the graph's label space to at least `new_capacity`. A no-op if
    /// the graph is already at least that large. Uses `try_reserve` so an
    /// allocation failure surfaces to the caller instead of aborting the
    /// process, matching spec §4.3's "capacity exhausted" fatal case.
    pub(crate) fn try_resize(&self, new_capacity: usize) -> Result<(), ()> {
        if new_capacity == 0 {
            return Ok(());
        }
        let mut vectors = self.vectors.write();
        if new_capacity <= vectors.len() {
            return Ok(());
        }
        let additional = new_capacity - vectors.len();
        vectors.try_reserve(additional).map_err(|_| ())?;
        vectors.resize(new_capacity, EMPTY_SLOT);

        let mut layers = self.layers.write();
        for layer in layers.iter_mut() {
            layer.ensure_capacity(new_capacity - 1);
        }
        Ok(())
    }

    /// Inserts or overwrites the vector at `label`. The caller (`HnswIndex`)
    /// has already grown capacity via [`Self::try_resize`].
    pub(crate) fn insert(&self, label: Label, vector: Vec<f32>) {
        {
            let mut vectors = self.vectors.write();
            if label >= vectors.len() {
                vectors.resize(label + 1, EMPTY_SLOT);
            }
            let was_present = vectors[label].is_some() && !self.deleted.read().contains(&label);
            vectors[label] = Some(vector);
            if !was_present {
                self.live_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.deleted.write().remove(&label);

        let node_layer = self.random_layer();
        {
            let mut layers = self.layers.write();
            while layers.len() <= node_layer {
                let cap = self.vectors.read().len();
                layers.push(Layer::new(cap));
            }
            for layer in layers.iter_mut() {
                layer.ensure_capacity(label);
            }
        }

        let entry_point = *self.entry_point.read();
        let Some(ep) = entry_point else {
            *self.entry_point.write() = Some(label);
            self.max_layer.store(node_layer, Ordering::Relaxed);
            return;
        };

        let query = self.get_vector(label);
        let mut current_ep = ep;
        let max_layer = self.max_layer.load(Ordering::Relaxed);

        for layer_idx in (node_layer + 1..=max_layer).rev() {
            current_ep = self.greedy_descend(&query, current_ep, layer_idx);
        }

        for layer_idx in (0..=node_layer).rev() {
            let candidates = self.search_layer(&query, vec![current_ep], self.ef_construction, layer_idx);
            let max_conn = if layer_idx == 0 { self.m0 } else { self.m };
            let selected = self.select_neighbors(&candidates, max_conn);

            self.layer_at(layer_idx).set_neighbors(label, selected.clone());
            for &neighbor in &selected {
                self.connect(label, neighbor, layer_idx, max_conn);
            }

            if let Some(&(best, _)) = candidates.first() {
                current_ep = best;
            }
        }

        if node_layer > max_layer {
            self.max_layer.store(node_layer, Ordering::Relaxed);
            *self.entry_point.write() = Some(label);
        }
    }

    /// Tombstones `label`. Idempotent; a label outside the occupied range is
    /// silently ignored (the applier only calls this for labels it owns).
    pub(crate) fn mark_deleted(&self, label: Label) {
        let occupied = self
            .vectors
            .read()
            .get(label)
            .is_some_and(std::option::Option::is_some);
        if !occupied {
            return;
        }
        if self.deleted.write().insert(label) {
            self.live_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn is_deleted(&self, label: Label) -> bool {
        self.deleted.read().contains(&label)
    }

    /// Returns the stored vector for `label`, or `None` if unoccupied or
    /// tombstoned.
    pub(crate) fn get_item(&self, label: Label) -> Option<Vec<f32>> {
        if self.is_deleted(label) {
            return None;
        }
        self.vectors.read().get(label).cloned().flatten()
    }

    /// Approximate k-nearest-neighbor search. `k` is clamped to the live
    /// count by the caller (`HnswIndex::knn`); `filter`, if present,
    /// restricts results to an allow-set of labels.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        filter: Option<&HashSet<Label>>,
    ) -> Vec<(Label, f32)> {
        let Some(ep) = *self.entry_point.read() else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let max_layer = self.max_layer.load(Ordering::Relaxed);
        let mut current_ep = ep;
        for layer_idx in (1..=max_layer).rev() {
            current_ep = self.greedy_descend(query, current_ep, layer_idx);
        }

        let ef = ef_search.max(k);
        let candidates = self.search_layer(query, vec![current_ep], ef, 0);

        candidates
            .into_iter()
            .filter(|(label, _)| !self.is_deleted(*label))
            .filter(|(label, _)| filter.is_none_or(|f| f.contains(label)))
            .take(k)
            .collect()
    }

    // -- internal helpers ---------------------------------------------------

    fn layer_at(&self, idx: usize) -> parking_lot::MappedRwLockReadGuard<'_, Layer> {
        parking_lot::RwLockReadGuard::map(self.layers.read(), |layers| &layers[idx])
    }

    fn get_vector(&self, label: Label) -> Vec<f32> {
        self.vectors.read()[label]
            .clone()
            .expect("label inserted before use")
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn random_layer(&self) -> usize {
        let mut state = self.rng_state.load(Ordering::Relaxed);
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state.store(state, Ordering::Relaxed);

        let uniform = ((state >> 11) as f64) / ((1u64 << 53) as f64);
        let uniform = uniform.max(f64::MIN_POSITIVE);
        let level = (-uniform.ln() * self.level_mult).floor();
        (level as usize).min(31)
    }

    fn greedy_descend(&self, query: &[f32], entry: Label, layer: usize) -> Label {
        let mut best = entry;
        let mut best_dist = self.metric.distance(query, &self.get_vector(entry));

        loop {
            let neighbors = self.layer_at(layer).get_neighbors(best);
            let mut improved = false;
            for neighbor in neighbors {
                let dist = self.metric.distance(query, &self.get_vector(neighbor));
                if dist < best_dist {
                    best = neighbor;
                    best_dist = dist;
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    fn search_layer(
        &self,
        query: &[f32],
        entry_points: Vec<Label>,
        ef: usize,
        layer: usize,
    ) -> Vec<(Label, f32)> {
        let mut visited: FxHashSet<Label> = FxHashSet::default();
        let mut candidates: BinaryHeap<Reverse<(OrderedDistance, Label)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedDistance, Label)> = BinaryHeap::new();

        let vectors = self.vectors.read();
        for ep in entry_points {
            let Some(v) = vectors[ep].as_ref() else { continue };
            let dist = self.metric.distance(query, v);
            candidates.push(Reverse((OrderedDistance(dist), ep)));
            results.push((OrderedDistance(dist), ep));
            visited.insert(ep);
        }

        while let Some(Reverse((OrderedDistance(c_dist), c_node))) = candidates.pop() {
            let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);
            if c_dist > furthest && results.len() >= ef {
                break;
            }

            for neighbor in self.layer_at(layer).get_neighbors(c_node) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(v) = vectors[neighbor].as_ref() else { continue };
                let dist = self.metric.distance(query, v);
                let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);

                if dist < furthest || results.len() < ef {
                    candidates.push(Reverse((OrderedDistance(dist), neighbor)));
                    results.push((OrderedDistance(dist), neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(Label, f32)> = results.into_iter().map(|(d, n)| (n, d.0)).collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        out
    }

    /// Standard HNSW neighbor-selection heuristic: keep a candidate only if
    /// it is closer to the new node than to every neighbor already chosen,
    /// otherwise it is a diversity-reducing "shortcut" edge.
    fn select_neighbors(&self, candidates: &[(Label, f32)], max_neighbors: usize) -> Vec<Label> {
        if candidates.len() <= max_neighbors {
            return candidates.iter().map(|(label, _)| *label).collect();
        }

        let mut selected: Vec<Label> = Vec::with_capacity(max_neighbors);
        let mut selected_vecs: Vec<Vec<f32>> = Vec::with_capacity(max_neighbors);

        for &(candidate, candidate_dist) in candidates {
            if selected.len() >= max_neighbors {
                break;
            }
            let candidate_vec = self.get_vector(candidate);
            let is_diverse = selected_vecs
                .iter()
                .all(|chosen| candidate_dist <= self.metric.distance(&candidate_vec, chosen));
            if is_diverse || selected.is_empty() {
                selected.push(candidate);
                selected_vecs.push(candidate_vec);
            }
        }

        if selected.len() < max_neighbors {
            for &(candidate, _) in candidates {
                if selected.len() >= max_neighbors {
                    break;
                }
                if !selected.contains(&candidate) {
                    selected.push(candidate);
                }
            }
        }

        selected
    }

    /// Captures everything needed to reconstruct this graph byte-for-byte,
    /// for `src/hnsw/persistence.rs` to write out.
    pub(crate) fn snapshot(&self) -> GraphSnapshot {
        let vectors = self.vectors.read().clone();
        let deleted = self.deleted.read().clone();
        let layers = self
            .layers
            .read()
            .iter()
            .map(|layer| (0..layer.capacity()).map(|l| layer.get_neighbors(l)).collect())
            .collect();

        GraphSnapshot {
            dim: self.dim,
            m: self.m,
            ef_construction: self.ef_construction,
            capacity: vectors.len(),
            entry_point: *self.entry_point.read(),
            max_layer: self.max_layer.load(Ordering::Relaxed),
            vectors,
            deleted,
            layers,
        }
    }

    /// Reconstructs a graph previously captured with [`Self::snapshot`].
    pub(crate) fn from_snapshot(metric: DistanceMetric, snapshot: GraphSnapshot) -> Self {
        let live_count = snapshot
            .vectors
            .iter()
            .enumerate()
            .filter(|(label, v)| v.is_some() && !snapshot.deleted.contains(label))
            .count();

        let layers = snapshot
            .layers
            .into_iter()
            .map(|adjacency| {
                let layer = Layer::new(adjacency.len());
                for (label, neighbors) in adjacency.into_iter().enumerate() {
                    layer.set_neighbors(label, neighbors);
                }
                layer
            })
            .collect();

        Self {
            metric,
            dim: snapshot.dim,
            vectors: RwLock::new(snapshot.vectors),
            layers: RwLock::new(layers),
            deleted: RwLock::new(snapshot.deleted),
            entry_point: RwLock::new(snapshot.entry_point),
            max_layer: AtomicUsize::new(snapshot.max_layer),
            live_count: AtomicUsize::new(live_count),
            rng_state: AtomicU64::new(0x5DEE_CE66_D1A4_B5B5),
            m: snapshot.m,
            m0: snapshot.m * 2,
            ef_construction: snapshot.ef_construction,
            level_mult: 1.0 / (snapshot.m as f64).ln(),
        }
    }

    fn connect(&self, new_node: Label, neighbor: Label, layer: usize, max_conn: usize) {
        let neighbor_vec = self.get_vector(neighbor);
        let current = self.layer_at(layer).get_neighbors(neighbor);

        if current.len() < max_conn {
            let mut updated = current;
            updated.push(new_node);
            self.layer_at(layer).set_neighbors(neighbor, updated);
            return;
        }

        let mut all = current;
        all.push(new_node);
        let mut with_dist: Vec<(Label, f32)> = all
            .into_iter()
            .map(|n| (n, self.metric.distance(&neighbor_vec, &self.get_vector(n))))
            .collect();
        with_dist.sort_by(|a, b| a.1.total_cmp(&b.1));
        let pruned: Vec<Label> = with_dist.into_iter().take(max_conn).map(|(n, _)| n).collect();
        self.layer_at(layer).set_neighbors(neighbor, pruned);
    }
}
