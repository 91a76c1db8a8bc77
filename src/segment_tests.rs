use super::*;
use crate::log::Operation;

fn config(dir: &std::path::Path) -> SegmentConfig {
    SegmentConfig {
        space: "l2".to_string(),
        m: 16,
        ef_construction: 100,
        ef_search: 10,
        num_threads: 1,
        batch_size: 3,
        sync_threshold: 3,
        resize_factor: 1.2,
        persist_directory: dir.to_string_lossy().to_string(),
        allow_reset: true,
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

fn update(offset: u64, id: &str, vector: Vec<f32>) -> LogRecord {
    LogRecord {
        offset,
        id: id.to_string(),
        operation: Operation::Update,
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

#[test]
fn test_scenario_1_add_three_query_all() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::create("seg", config(dir.path())).unwrap();

    segment.ingest(add(1, "a", vec![0.0, 0.0])).unwrap();
    segment.ingest(add(2, "b", vec![1.0, 0.0])).unwrap();
    segment.ingest(add(3, "c", vec![0.0, 1.0])).unwrap();

    let results = segment.query_vectors(&[vec![0.0, 0.0]], 3, None, false);
    let ids: Vec<&str> = results[0].iter().map(|(id, _, _)| id.as_str()).collect();
    let distances: Vec<f32> = results[0].iter().map(|(_, d, _)| *d).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(distances, vec![0.0, 1.0, 1.0]);
}

#[test]
fn test_scenario_2_update_visible_before_and_after_apply() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::create("seg", config(dir.path())).unwrap();
    segment.ingest(add(1, "a", vec![0.0, 0.0])).unwrap();
    segment.ingest(add(2, "b", vec![1.0, 0.0])).unwrap();
    segment.ingest(add(3, "c", vec![0.0, 1.0])).unwrap();

    segment.ingest(update(4, "b", vec![10.0, 10.0])).unwrap();
    let before = segment.query_vectors(&[vec![0.0, 0.0]], 1, None, false);
    assert_eq!(before[0][0].0, "a");

    // one more record forces the next apply (batch_size=3).
    segment.ingest(add(5, "d", vec![2.0, 2.0])).unwrap();

    let after = segment.query_vectors(&[vec![10.0, 10.0]], 1, None, false);
    assert_eq!(after[0][0].0, "b");
    assert_eq!(after[0][0].1, 0.0);
}

#[test]
fn test_scenario_3_readd_after_delete_in_same_batch() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::create("seg", config(dir.path())).unwrap();

    segment.ingest(add(1, "a", vec![0.0, 0.0])).unwrap();
    segment.ingest(delete(2, "a")).unwrap();
    segment.ingest(add(3, "a", vec![5.0, 5.0])).unwrap();

    let result = segment.get_vectors(Some(&["a".to_string()]));
    assert_eq!(result, vec![("a".to_string(), vec![5.0, 5.0])]);
}

#[test]
fn test_scenario_4_persist_crash_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let total = 30;
    {
        let segment = Segment::create("seg", cfg.clone()).unwrap();
        for i in 0..total {
            let id = format!("id-{i}");
            let vector = vec![i as f32, (i * 2) as f32];
            segment.ingest(add(i as u64 + 1, &id, vector)).unwrap();
        }
        segment.close().unwrap();
    }

    let reopened = Segment::open("seg", cfg).unwrap();
    assert_eq!(reopened.count(), total);
    assert_eq!(reopened.max_applied_offset(), total as u64);

    let results = reopened.query_vectors(&[vec![0.0, 0.0]], 1, None, false);
    assert_eq!(results[0][0].0, "id-0");
}

#[test]
fn test_scenario_5_dimension_mismatch_dropped_others_continue() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SegmentConfig {
        batch_size: 5,
        sync_threshold: 5,
        ..config(dir.path())
    };
    let segment = Segment::create("seg", cfg).unwrap();

    segment.ingest(add(1, "a", vec![0.0, 0.0, 0.0])).unwrap();
    segment.ingest(add(2, "bad", vec![1.0, 1.0, 1.0, 1.0])).unwrap();
    segment.ingest(add(3, "b", vec![1.0, 1.0, 1.0])).unwrap();

    assert_eq!(segment.invalid_operation_count(), 1);
    assert_eq!(segment.count(), 2);
}

#[test]
fn test_scenario_6_query_merges_batch_updates_with_hnsw_results() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SegmentConfig {
        batch_size: 10,
        sync_threshold: 10,
        ..config(dir.path())
    };
    let segment = Segment::create("seg", cfg).unwrap();

    for (i, (id, vector)) in [
        ("a", vec![0.0, 0.0]),
        ("b", vec![1.0, 0.0]),
        ("c", vec![0.0, 1.0]),
        ("d", vec![2.0, 0.0]),
        ("e", vec![0.0, 2.0]),
    ]
    .into_iter()
    .enumerate()
    {
        segment.ingest(add(i as u64 + 1, id, vector)).unwrap();
    }
    segment.ingest(update(6, "a", vec![0.0, 0.1])).unwrap();
    segment.ingest(update(7, "b", vec![1.0, 0.1])).unwrap();
    segment.ingest(update(8, "c", vec![0.0, 1.1])).unwrap();

    let results = segment.query_vectors(&[vec![0.0, 0.0]], 5, None, false);
    let ids: Vec<&str> = results[0].iter().map(|(id, _, _)| id.as_str()).collect();
    assert_eq!(ids.len(), 5);
    let unique: std::collections::HashSet<&str> = ids.iter().copied().collect();
    assert_eq!(unique.len(), 5, "no duplicate ids across bf and hnsw results");
}

#[test]
fn test_empty_segment_returns_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::create("seg", config(dir.path())).unwrap();

    assert!(segment.get_vectors(None).is_empty());
    let results = segment.query_vectors(&[vec![0.0, 0.0]], 3, None, false);
    assert!(results[0].is_empty());
}

#[test]
fn test_close_is_idempotent_and_flushes_partial_batch() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::create("seg", config(dir.path())).unwrap();
    segment.ingest(add(1, "a", vec![0.0, 0.0])).unwrap();

    segment.close().unwrap();
    segment.close().unwrap();
    assert_eq!(segment.state(), SegmentState::Closed);
    assert_eq!(segment.count(), 1);
}

#[test]
fn test_delete_requires_closed_state() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::create("seg", config(dir.path())).unwrap();
    let err = segment.delete().unwrap_err();
    assert!(matches!(err, Error::StoppedComponent));

    segment.close().unwrap();
    segment.delete().unwrap();
}

#[test]
fn test_reset_state_forbidden_without_allow_reset() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SegmentConfig {
        allow_reset: false,
        ..config(dir.path())
    };
    let segment = Segment::create("seg", cfg).unwrap();
    segment.close().unwrap();

    let err = segment.reset_state().unwrap_err();
    assert!(matches!(err, Error::ResetForbidden));
}

#[test]
fn test_ingest_rejected_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::create("seg", config(dir.path())).unwrap();
    segment.close().unwrap();

    let err = segment.ingest(add(1, "a", vec![0.0, 0.0])).unwrap_err();
    assert!(matches!(err, Error::StoppedComponent));
}

#[test]
fn test_file_handle_count_is_five() {
    assert_eq!(Segment::file_handle_count(), 5);
}

// =========================================================================
// Property-based tests: spec's universal invariants.
// =========================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize, Vec<f32>),
        Delete(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..6, proptest::collection::vec(-10.0f32..10.0, 2)).prop_map(|(id, v)| Op::Add(id, v)),
            (0usize..6).prop_map(Op::Delete),
        ]
    }

    fn apply_ops(segment: &Segment, ops: &[Op]) -> (HashSet<String>, u64) {
        let mut alive = HashSet::new();
        let mut offset = 0u64;
        for op in ops {
            offset += 1;
            match op {
                Op::Add(id, vector) => {
                    let id = id.to_string();
                    segment.ingest(add(offset, &id, vector.clone())).unwrap();
                    alive.insert(id);
                }
                Op::Delete(id) => {
                    let id = id.to_string();
                    if alive.remove(&id) {
                        segment.ingest(delete(offset, &id)).unwrap();
                    }
                }
            }
        }
        (alive, offset)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// `count()` always equals the number of ids alive after the sequence
        /// (spec §8 universal invariant 1), whether or not the trailing batch
        /// has been applied yet.
        #[test]
        fn prop_count_matches_alive_ids(ops in proptest::collection::vec(op_strategy(), 0..30)) {
            let dir = tempfile::tempdir().unwrap();
            let segment = Segment::create("seg", config(dir.path())).unwrap();
            let (alive, _offset) = apply_ops(&segment, &ops);
            prop_assert_eq!(segment.count(), alive.len());
        }

        /// `id_to_label`/`label_to_id` stay exact inverses after every apply
        /// (spec §8 universal invariant 2).
        #[test]
        fn prop_id_maps_stay_consistent(ops in proptest::collection::vec(op_strategy(), 0..30)) {
            let dir = tempfile::tempdir().unwrap();
            let segment = Segment::create("seg", config(dir.path())).unwrap();
            apply_ops(&segment, &ops);
            prop_assert!(segment.core.read().id_maps.is_consistent());
        }

        /// `max_applied_offset()` never decreases as records are ingested
        /// (spec §8 universal invariant 4).
        #[test]
        fn prop_max_applied_offset_non_decreasing(ops in proptest::collection::vec(op_strategy(), 1..30)) {
            let dir = tempfile::tempdir().unwrap();
            let segment = Segment::create("seg", config(dir.path())).unwrap();
            let mut last = 0u64;
            let mut offset = 0u64;
            for op in &ops {
                offset += 1;
                match op {
                    Op::Add(id, vector) => {
                        segment.ingest(add(offset, &id.to_string(), vector.clone())).unwrap();
                    }
                    Op::Delete(id) => {
                        segment.ingest(delete(offset, &id.to_string())).unwrap();
                    }
                }
                let current = segment.max_applied_offset();
                prop_assert!(current >= last);
                last = current;
            }
        }

        /// Labels handed out to distinct ids are always distinct (spec §8
        /// universal invariant 5).
        #[test]
        fn prop_labels_never_collide(ops in proptest::collection::vec(op_strategy(), 0..30)) {
            let dir = tempfile::tempdir().unwrap();
            let segment = Segment::create("seg", config(dir.path())).unwrap();
            apply_ops(&segment, &ops);

            let core = segment.core.read();
            let labels: Vec<usize> = core.id_maps.id_to_label_map().values().copied().collect();
            let unique: HashSet<usize> = labels.iter().copied().collect();
            prop_assert_eq!(labels.len(), unique.len());
        }
    }

    /// Repeated `delete()` after the first success is a no-op (spec §8
    /// idempotence invariant).
    #[test]
    fn test_repeated_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let segment = Segment::create("seg", config(dir.path())).unwrap();
        segment.close().unwrap();
        segment.delete().unwrap();
        segment.delete().unwrap();
    }

    /// Repeated `persist()` (via `close()`) with no intervening writes is a
    /// no-op (spec §8 idempotence invariant).
    #[test]
    fn test_repeated_close_persist_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let segment = Segment::create("seg", config(dir.path())).unwrap();
        segment.ingest(add(1, "a", vec![0.0, 0.0])).unwrap();
        segment.close().unwrap();
        let offset_after_first = segment.max_applied_offset();
        segment.close().unwrap();
        assert_eq!(segment.max_applied_offset(), offset_after_first);
    }
}
