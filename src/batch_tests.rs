use super::*;
use crate::distance::DistanceMetric;
use crate::hnsw::{HnswIndex, HnswParams};

fn params() -> HnswParams {
    HnswParams {
        m: 16,
        ef_construction: 100,
        ef_search: 10,
        num_threads: 1,
        resize_factor: 1.2,
    }
}

fn add(offset: u64, id: &str, vector: Vec<f32>) -> LogRecord {
    LogRecord {
        offset,
        id: id.to_string(),
        operation: Operation::Add,
        embedding: Some(vector),
    }
}

fn delete(offset: u64, id: &str) -> LogRecord {
    LogRecord {
        offset,
        id: id.to_string(),
        operation: Operation::Delete,
        embedding: None,
    }
}

fn update(offset: u64, id: &str, vector: Vec<f32>) -> LogRecord {
    LogRecord {
        offset,
        id: id.to_string(),
        operation: Operation::Update,
        embedding: Some(vector),
    }
}

fn upsert(offset: u64, id: &str, vector: Vec<f32>) -> LogRecord {
    LogRecord {
        offset,
        id: id.to_string(),
        operation: Operation::Upsert,
        embedding: Some(vector),
    }
}

struct Fixture {
    applier: BatchApplier,
    id_maps: IdMaps,
    bf: BruteForceIndex,
    hnsw: HnswIndex,
}

fn fixture(batch_size: usize, sync_threshold: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    Fixture {
        applier: BatchApplier::new(batch_size, sync_threshold),
        id_maps: IdMaps::new(),
        bf: BruteForceIndex::new(batch_size),
        hnsw: HnswIndex::new(DistanceMetric::L2, params(), dir.path().to_path_buf()),
    }
}

#[test]
fn test_scenario_add_three_then_query() {
    let mut f = fixture(3, 3);
    for (i, (id, vec)) in [("a", vec![0.0, 0.0]), ("b", vec![1.0, 0.0]), ("c", vec![0.0, 1.0])]
        .into_iter()
        .enumerate()
    {
        f.applier.ingest(add(i as u64 + 1, id, vec), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    }
    assert!(f.applier.is_apply_due());

    let outcome = f.applier.apply(&mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    assert_eq!(outcome.records_applied, 3);
    assert_eq!(outcome.max_offset, Some(3));
    assert_eq!(f.id_maps.len(), 3);
    assert!(f.bf.is_empty());

    let results = f.hnsw.knn(&[0.0, 0.0], 3, None);
    assert_eq!(results.len(), 3);
}

#[test]
fn test_scenario_delete_then_readd_same_batch() {
    let mut f = fixture(3, 3);
    f.applier.ingest(add(1, "a", vec![0.0, 0.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    f.applier.ingest(delete(2, "a"), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    f.applier.ingest(add(3, "a", vec![5.0, 5.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();

    assert_eq!(f.applier.current_batch().add_count, 2);
    assert_eq!(f.applier.current_batch().delete_count, 1);
    assert_eq!(f.applier.current_batch().written_ids(), &["a".to_string()]);

    f.applier.apply(&mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    let label = f.id_maps.label_for("a").unwrap();
    assert_eq!(f.hnsw.get_items(&[label])[0], Some(vec![5.0, 5.0]));
}

#[test]
fn test_duplicate_add_is_dropped_as_invalid() {
    let mut f = fixture(5, 5);
    f.applier.ingest(add(1, "a", vec![0.0, 0.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    f.applier.ingest(add(2, "a", vec![9.0, 9.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();

    assert_eq!(f.applier.invalid_operation_count(), 1);
    assert_eq!(f.applier.current_batch().add_count, 1);
}

#[test]
fn test_update_unknown_id_is_dropped() {
    let mut f = fixture(5, 5);
    f.applier.ingest(update(1, "ghost", vec![1.0, 1.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    assert_eq!(f.applier.invalid_operation_count(), 1);
    assert_eq!(f.applier.current_batch().update_count, 0);
}

#[test]
fn test_dimension_mismatch_dropped_after_dim_fixed() {
    let mut f = fixture(5, 5);
    f.applier.ingest(add(1, "a", vec![0.0, 0.0, 0.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    assert_eq!(f.applier.dim(), Some(3));

    f.applier.ingest(add(2, "b", vec![1.0, 1.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    assert_eq!(f.applier.invalid_operation_count(), 1);
    assert_eq!(f.applier.current_batch().add_count, 1);
}

#[test]
fn test_offset_at_or_before_watermark_dropped() {
    let mut f = fixture(5, 5);
    f.applier.ingest(add(3, "a", vec![0.0, 0.0]), Some(5), &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    assert_eq!(f.applier.invalid_operation_count(), 1);
    assert_eq!(f.applier.current_batch().add_count, 0);
}

#[test]
fn test_apply_persists_cadence_threshold() {
    let mut f = fixture(2, 2);
    f.applier.ingest(add(1, "a", vec![0.0, 0.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    f.applier.ingest(add(2, "b", vec![1.0, 0.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();

    let outcome = f.applier.apply(&mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    assert!(outcome.should_persist);
}

#[test]
fn test_empty_apply_is_a_no_op() {
    let mut f = fixture(3, 3);
    let outcome = f.applier.apply(&mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    assert_eq!(outcome.records_applied, 0);
    assert_eq!(outcome.max_offset, None);
}

/// ADD|yes|yes (spec.md:89-93 left this combination unfilled): a
/// *previously committed* id, deleted within the currently open batch,
/// then re-added before that batch applies. Per
/// `original_source/chromadb/segment/impl/vector/local_persistent_hnsw.py:283-288`
/// this must succeed, getting a genuinely fresh label — not the stale one.
#[test]
fn test_readd_of_committed_id_after_in_batch_delete_gets_fresh_label() {
    let mut f = fixture(5, 5);
    f.applier.ingest(add(1, "a", vec![0.0, 0.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    f.applier.apply(&mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    let old_label = f.id_maps.label_for("a").unwrap();

    f.applier.ingest(delete(2, "a"), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    f.applier.ingest(add(3, "a", vec![5.0, 5.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();

    assert_eq!(f.applier.invalid_operation_count(), 0, "resurrection of a committed id must not be dropped");
    assert!(f.applier.current_batch().deleted_ids().contains("a"), "delete must survive so apply()'s step 1 can evict the old label");

    f.applier.apply(&mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    let new_label = f.id_maps.label_for("a").unwrap();
    assert_ne!(old_label, new_label, "resurrection must not reuse the evicted label");
    assert_eq!(f.hnsw.get_items(&[new_label])[0], Some(vec![5.0, 5.0]));
    assert!(f.id_maps.is_consistent());
}

/// spec.md's `BatchFull` — "triggers an immediate apply rather than an
/// error to the caller" — exercised with a brute-force capacity smaller
/// than the applier's batch_size, so the buffer genuinely fills mid-batch.
#[test]
fn test_batch_full_forces_apply_and_retries() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = Fixture {
        applier: BatchApplier::new(5, 5),
        id_maps: IdMaps::new(),
        bf: BruteForceIndex::new(2),
        hnsw: HnswIndex::new(DistanceMetric::L2, params(), dir.path().to_path_buf()),
    };

    f.applier.ingest(add(1, "a", vec![0.0, 0.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    f.applier.ingest(add(2, "b", vec![1.0, 0.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();
    // bf is now at capacity (2); a third distinct id must force an apply.
    f.applier.ingest(add(3, "c", vec![0.0, 1.0]), None, &mut f.id_maps, &mut f.bf, &f.hnsw).unwrap();

    assert_eq!(f.id_maps.len(), 2, "the forced apply must have committed a and b");
    assert_eq!(f.applier.current_batch().written_ids(), &["c".to_string()], "c must survive the retry into the fresh batch");
    assert!(f.bf.get("c").is_some());
}
