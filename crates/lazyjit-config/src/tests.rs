//! Tests for engine configuration.

use super::*;

#[test]
fn test_toml_parsing() {
    let toml = r#"
        opt_level = "speed_and_size"
        verify_ir = false
        partition_policy = "whole_module"
        host_symbols = false
        entry_point = "start"
    "#;

    let config = JitConfig::from_toml_str(toml).unwrap();
    assert_eq!(config.opt_level, OptLevel::SpeedAndSize);
    assert!(!config.verify_ir);
    assert_eq!(config.partition_policy, PartitionPolicy::WholeModule);
    assert!(!config.host_symbols);
    assert_eq!(config.entry_point, "start");
}

#[test]
fn test_yaml_parsing() {
    let yaml = r#"
        opt_level: speed
        partition_policy: strongly_connected
    "#;

    let config = JitConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.opt_level, OptLevel::Speed);
    assert_eq!(config.partition_policy, PartitionPolicy::StronglyConnected);
    assert!(config.verify_ir);
}

#[test]
fn test_missing_fields_use_defaults() {
    let config = JitConfig::from_toml_str("").unwrap();
    assert_eq!(config, JitConfig::default());
    assert_eq!(config.partition_policy, PartitionPolicy::PerFunction);
    assert!(config.host_symbols);
}

#[test]
fn test_builder() {
    let config = JitConfig::new()
        .with_opt_level(OptLevel::Speed)
        .with_partition_policy(PartitionPolicy::StronglyConnected)
        .with_host_symbols(false)
        .with_entry_point("entry");

    assert_eq!(config.opt_level.as_setting(), "speed");
    assert_eq!(config.partition_policy, PartitionPolicy::StronglyConnected);
    assert!(!config.host_symbols);
    assert_eq!(config.entry_point, "entry");
}

#[test]
fn test_empty_entry_point_rejected() {
    let err = JitConfig::from_toml_str(r#"entry_point = "  ""#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_unknown_policy_rejected() {
    assert!(JitConfig::from_toml_str(r#"partition_policy = "random""#).is_err());
}

#[test]
fn test_missing_file_falls_back() {
    let config = JitConfig::load("/nonexistent/lazyjit.toml").unwrap_or_default();
    assert_eq!(config.entry_point, "main");
}
