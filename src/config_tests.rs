//! Tests for `config` module

use super::*;

#[test]
fn test_default_config_is_valid() {
    let config = SegmentConfig::default();
    assert!(config.validate().is_ok());
}

#[test]
fn test_default_space_is_l2() {
    let config = SegmentConfig::default();
    assert_eq!(config.distance_metric().unwrap(), DistanceMetric::L2);
}

#[test]
fn test_batch_size_minimum_enforced() {
    let mut config = SegmentConfig {
        batch_size: 2,
        sync_threshold: 2,
        ..SegmentConfig::default()
    };
    assert!(config.validate().is_err());

    config.batch_size = 3;
    config.sync_threshold = 3;
    assert!(config.validate().is_ok());
}

#[test]
fn test_sync_threshold_must_be_at_least_batch_size() {
    let config = SegmentConfig {
        batch_size: 10,
        sync_threshold: 5,
        ..SegmentConfig::default()
    };
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "sync_threshold"));
}

#[test]
fn test_resize_factor_must_be_at_least_one() {
    let config = SegmentConfig {
        resize_factor: 0.5,
        ..SegmentConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_space_rejected() {
    let config = SegmentConfig {
        space: "jaccard".to_string(),
        ..SegmentConfig::default()
    };
    assert!(config.validate().is_err());
    assert!(config.distance_metric().is_err());
}

#[test]
fn test_zero_m_rejected() {
    let config = SegmentConfig {
        m: 0,
        ..SegmentConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_from_toml_overrides_defaults() {
    let toml_str = r#"
        space = "cosine"
        m = 32
        batch_size = 5
        sync_threshold = 5
    "#;
    let config = SegmentConfig::from_toml(toml_str).unwrap();
    assert_eq!(config.space, "cosine");
    assert_eq!(config.m, 32);
    assert_eq!(config.batch_size, 5);
}

#[test]
fn test_from_toml_rejects_invalid() {
    let toml_str = r#"
        batch_size = 1
    "#;
    assert!(SegmentConfig::from_toml(toml_str).is_err());
}

#[test]
fn test_to_toml_round_trips() {
    let config = SegmentConfig::default();
    let toml_str = config.to_toml().unwrap();
    let round_tripped = SegmentConfig::from_toml(&toml_str).unwrap();
    assert_eq!(round_tripped.space, config.space);
    assert_eq!(round_tripped.batch_size, config.batch_size);
}

#[test]
fn test_load_from_path_reads_file() {
    use std::io::Write;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("segment.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "space = \"ip\"\nbatch_size = 4\nsync_threshold = 4").unwrap();

    let config = SegmentConfig::load_from_path(&path).unwrap();
    assert_eq!(config.space, "ip");
    assert_eq!(config.batch_size, 4);
}
