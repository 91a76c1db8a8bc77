//! A single level of the HNSW hierarchy.
//!
//! Layer 0 holds every live label and carries the dense bottom-level graph;
//! higher layers are sparser and only reached by nodes whose randomly-chosen
//! level is high enough. Each layer stores its adjacency list as one lock
//! per node rather than one lock for the whole layer, so concurrent inserts
//! touching different neighborhoods don't serialize on each other.

use parking_lot::RwLock;

/// Dense integer address of a vector in the graph. Identical to the
/// `Label` the segment's id maps hand out — see `src/id_maps.rs`.
pub type Label = usize;

/// One level of the hierarchy: an adjacency list indexed by label.
#[derive(Debug)]
pub struct Layer {
    neighbors: Vec<RwLock<Vec<Label>>>,
}

impl Layer {
    /// Creates a layer pre-sized to hold `capacity` labels.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            neighbors: (0..capacity).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    /// Grows the layer so `label` has a slot, if it doesn't already.
    pub(crate) fn ensure_capacity(&mut self, label: Label) {
        while self.neighbors.len() <= label {
            self.neighbors.push(RwLock::new(Vec::new()));
        }
    }

    /// Returns a copy of `label`'s current neighbor list.
    pub(crate) fn get_neighbors(&self, label: Label) -> Vec<Label> {
        self.neighbors
            .get(label)
            .map(|lock| lock.read().clone())
            .unwrap_or_default()
    }

    /// Overwrites `label`'s neighbor list.
    pub(crate) fn set_neighbors(&self, label: Label, neighbors: Vec<Label>) {
        if let Some(lock) = self.neighbors.get(label) {
            *lock.write() = neighbors;
        }
    }

    /// Number of label slots currently allocated in this layer.
    pub(crate) fn capacity(&self) -> usize {
        self.neighbors.len()
    }
}
