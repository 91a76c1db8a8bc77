//! Bidirectional id↔label mapping plus per-id offset bookkeeping (spec §4.1).
//!
//! `IdMaps` is a leaf component: it holds no lock of its own because the
//! segment's single read/write lock already covers it (spec §5). Every
//! method here borrows `&mut self` for mutation and `&self` for lookup;
//! callers hold the segment lock for the duration.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Internal dense integer label assigned to an id on first admission.
pub type Label = usize;

/// The three mappings spec §4.1 requires, plus the persisted label counter.
#[derive(Debug, Default)]
pub struct IdMaps {
    id_to_label: HashMap<String, Label>,
    label_to_id: HashMap<Label, String>,
    id_to_offset: HashMap<String, u64>,
    next_label: Label,
}

impl IdMaps {
    /// Empty maps, label counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstructs maps from a persisted snapshot (spec §4.5 recovery).
    #[must_use]
    pub fn from_parts(
        id_to_label: HashMap<String, Label>,
        id_to_offset: HashMap<String, u64>,
        next_label: Label,
    ) -> Self {
        let label_to_id = id_to_label.iter().map(|(id, &label)| (label, id.clone())).collect();
        Self {
            id_to_label,
            label_to_id,
            id_to_offset,
            next_label,
        }
    }

    /// `label_to_id` is the canonical set of ids that currently hold a label.
    pub fn len(&self) -> usize {
        self.label_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_to_id.is_empty()
    }

    pub fn next_label(&self) -> Label {
        self.next_label
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.id_to_label.contains_key(id)
    }

    pub fn label_for(&self, id: &str) -> Option<Label> {
        self.id_to_label.get(id).copied()
    }

    pub fn id_for(&self, label: Label) -> Option<&str> {
        self.label_to_id.get(&label).map(String::as_str)
    }

    pub fn last_applied_offset(&self, id: &str) -> Option<u64> {
        self.id_to_offset.get(id).copied()
    }

    /// Allocates a fresh label for `id` without yet committing it — the
    /// label is not visible via `label_for`/`id_for` until [`Self::commit`]
    /// is called, per spec §4.1: "incremented only after the HnswIndex add
    /// has succeeded in memory."
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if `id` is already mapped.
    pub fn reserve_label(&self, id: &str) -> Result<Label> {
        if self.id_to_label.contains_key(id) {
            return Err(Error::DuplicateId(id.to_string()));
        }
        Ok(self.next_label)
    }

    /// Commits `count` freshly reserved labels (advancing `next_label`) and
    /// records the final `id -> label` entries for a whole apply in one
    /// step, per spec §4.4 step 5. `fresh` pairs ids with the labels
    /// `reserve_label` handed out, in the order they were reserved.
    pub fn commit(&mut self, fresh: &[(String, Label)], offsets: &[(String, u64)]) {
        for (id, label) in fresh {
            self.id_to_label.insert(id.clone(), *label);
            self.label_to_id.insert(*label, id.clone());
        }
        self.next_label += fresh.len();
        for (id, offset) in offsets {
            self.id_to_offset.insert(id.clone(), *offset);
        }
    }

    /// Removes `id` and its label from all three maps (spec §4.4 step 1).
    /// A no-op if `id` has no label.
    pub fn remove(&mut self, id: &str) {
        if let Some(label) = self.id_to_label.remove(id) {
            self.label_to_id.remove(&label);
        }
        self.id_to_offset.remove(id);
    }

    /// Looks up `id`'s current label, erroring if it isn't mapped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownId`] if `id` has no label.
    pub fn require_label(&self, id: &str) -> Result<Label> {
        self.label_for(id).ok_or_else(|| Error::UnknownId(id.to_string()))
    }

    /// Checks invariant 1 of spec §3: the two maps are exact inverses.
    /// Exposed for property tests, not used on the hot path.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.id_to_label.len() != self.label_to_id.len() {
            return false;
        }
        self.id_to_label
            .iter()
            .all(|(id, &label)| self.label_to_id.get(&label).is_some_and(|back| back == id))
    }

    pub(crate) fn id_to_label_map(&self) -> &HashMap<String, Label> {
        &self.id_to_label
    }

    pub(crate) fn id_to_offset_map(&self) -> &HashMap<String, u64> {
        &self.id_to_offset
    }
}

#[cfg(test)]
#[path = "id_maps_tests.rs"]
mod id_maps_tests;
