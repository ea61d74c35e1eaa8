//! Tests for configuration validation

use std::io::Write;

use fix_dispatch::config::{
    DispatchConfig, DispatcherConfig, HealthThresholds, LedgerConfig, PlannerConfig, PoolConfig,
    ResourceSpec,
};
use fix_dispatch::core::Strategy;
use fix_dispatch::util::serde::{ResourceId, ResourceKind};

fn cache() -> ResourceSpec {
    ResourceSpec::Cache {
        host: "localhost".into(),
        port: 6379,
    }
}

#[test]
fn test_pool_config_validation() {
    let valid = PoolConfig::new(cache()).with_size(3).with_bounds(1, 5);
    assert!(valid.validate().is_ok());
}

#[test]
fn test_pool_config_size_outside_bounds() {
    let too_big = PoolConfig::new(cache()).with_size(6).with_bounds(1, 5);
    assert!(too_big.validate().is_err());

    let too_small = PoolConfig::new(cache()).with_size(0).with_bounds(1, 5);
    assert!(too_small.validate().is_err());
}

#[test]
fn test_pool_config_min_above_max() {
    let invalid = PoolConfig::new(cache()).with_size(3).with_bounds(4, 3);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_thresholds() {
    let invalid = PoolConfig::new(cache()).with_health(HealthThresholds {
        overloaded_above: 0.2,
        underutilized_below: 0.5,
        grow_step: 1,
        shrink_step: 1,
    });
    assert!(invalid.validate().is_err());

    let zero_step = PoolConfig::new(cache()).with_health(HealthThresholds {
        grow_step: 0,
        ..HealthThresholds::default()
    });
    assert!(zero_step.validate().is_err());
}

#[test]
fn test_pool_config_empty_target() {
    let invalid = PoolConfig::new(ResourceSpec::Database {
        connection_string: String::new(),
    });
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_from_json() {
    let cfg: PoolConfig = serde_json::from_str(
        r#"{"size": 3, "max_size": 5, "type": "http", "base_url": "http://build-agent:8080"}"#,
    )
    .unwrap();
    assert_eq!(cfg.size, 3);
    assert_eq!(cfg.min_size, 1);
    assert_eq!(cfg.max_size, 5);
    assert_eq!(cfg.acquire_timeout_ms, 5_000);
    assert!(!cfg.grow_on_demand);
    assert_eq!(cfg.resource.kind(), ResourceKind::Http);
    assert_eq!(cfg.health, HealthThresholds::default());
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_connection_info_names_resource() {
    let spec = ResourceSpec::Api {
        endpoint: "https://api.example.com".into(),
        rate_limit_per_min: 120,
    };
    let info = spec.connection_info(&ResourceId::from("api-4"));
    assert!(info.starts_with("https://api.example.com"));
    assert!(info.contains("api-4"));
    assert!(info.contains("rpm=120"));
}

#[test]
fn test_section_defaults() {
    let ledger = LedgerConfig::default();
    assert_eq!(ledger.soft_expire_days, Some(30));
    assert!((ledger.similarity_floor - 0.5).abs() < f64::EPSILON);
    assert!(ledger.validate().is_ok());

    let planner = PlannerConfig::default();
    assert_eq!(planner.min_threshold, 1);
    assert_eq!(planner.max_per_class, 8);
    assert_eq!(planner.strategy, Strategy::Balanced);

    let dispatcher = DispatcherConfig::default();
    assert!(dispatcher.worker_count >= 1);
    assert!(dispatcher.validate().is_ok());
    assert!(dispatcher.with_worker_count(0).validate().is_err());
}

#[test]
fn test_dispatch_config_from_json() {
    let cfg = DispatchConfig::from_json_str(
        r#"{
            "pools": {
                "web": {"size": 2, "max_size": 4, "type": "http", "base_url": "http://localhost"}
            },
            "planner": {"strategy": "aggressive", "max_per_class": 4},
            "dispatcher": {"pool": "web", "worker_count": 2}
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.planner.strategy, Strategy::Aggressive);
    assert_eq!(cfg.planner.min_threshold, 1);
    assert_eq!(cfg.dispatcher.worker_count, 2);
    assert_eq!(cfg.health_interval_secs, 30);
    assert!(cfg.state_dir.is_none());
}

#[test]
fn test_dispatch_config_rejects_missing_dispatcher_pool() {
    let err = DispatchConfig::from_json_str(
        r#"{"pools": {"web": {"size": 1, "max_size": 1, "type": "cache", "host": "h", "port": 1}}}"#,
    )
    .unwrap_err();
    assert!(err.contains("dispatcher pool"));
}

#[test]
fn test_dispatch_config_rejects_bad_pool_name() {
    let err = DispatchConfig::from_json_str(
        r#"{
            "pools": {"we/b": {"size": 1, "max_size": 1, "type": "cache", "host": "h", "port": 1}},
            "dispatcher": {"pool": "we/b"}
        }"#,
    )
    .unwrap_err();
    assert!(err.contains("we/b"));
}

#[test]
fn test_dispatch_config_rejects_empty_pools() {
    assert!(DispatchConfig::from_json_str(r#"{"pools": {}}"#).is_err());
    assert!(DispatchConfig::from_json_str("not json").is_err());
}

#[test]
fn test_dispatch_config_from_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"pools": {{"default": {{"size": 1, "max_size": 2, "type": "database", "connection_string": "sqlite://fixes.db"}}}}}}"#
    )
    .unwrap();
    let cfg = DispatchConfig::from_path(file.path()).unwrap();
    assert_eq!(cfg.pools["default"].max_size, 2);
    assert!(DispatchConfig::from_path("/nonexistent/dispatch.json").is_err());
}
