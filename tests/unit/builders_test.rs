//! Tests for builder modules

use std::collections::HashMap;
use std::sync::Arc;

use fix_dispatch::builders::{build_pools, build_store, DispatchEngine};
use fix_dispatch::config::{DispatchConfig, DispatcherConfig, PoolConfig, ResourceSpec};
use fix_dispatch::core::{AuditAction, InMemoryAuditSink};
use fix_dispatch::infra::InMemoryStore;
use parking_lot::Mutex;

fn config(state_dir: Option<std::path::PathBuf>) -> DispatchConfig {
    let mut pools = HashMap::new();
    pools.insert(
        "db".to_string(),
        PoolConfig::new(ResourceSpec::Database {
            connection_string: "postgres://localhost/fixes".into(),
        })
        .with_size(2)
        .with_bounds(1, 4),
    );
    pools.insert(
        "web".to_string(),
        PoolConfig::new(ResourceSpec::Http {
            base_url: "http://localhost:8080".into(),
            keep_alive_secs: 30,
        })
        .with_size(1)
        .with_bounds(1, 2),
    );
    DispatchConfig {
        state_dir,
        pools,
        store: Default::default(),
        ledger: Default::default(),
        planner: Default::default(),
        dispatcher: DispatcherConfig::default().with_pool("db").with_worker_count(2),
        health_interval_secs: 30,
    }
}

#[test]
fn test_build_pools_creates_every_pool() {
    let registry = build_pools(&config(None), Arc::new(InMemoryStore::new()), None).unwrap();
    assert_eq!(registry.list().unwrap(), vec!["db", "web"]);
    assert_eq!(registry.snapshot("db").unwrap().total, 2);
    assert_eq!(registry.snapshot("web").unwrap().max_size, 2);
}

#[test]
fn test_build_pools_rejects_invalid_config() {
    let mut cfg = config(None);
    cfg.dispatcher.pool = "missing".into();
    assert!(build_pools(&cfg, Arc::new(InMemoryStore::new()), None).is_err());
}

#[test]
fn test_build_pools_reopens_persisted_state() {
    let store = Arc::new(InMemoryStore::new());
    let cfg = config(None);
    let first = build_pools(&cfg, store.clone(), None).unwrap();
    first.grow("db", 2).unwrap();

    let second = build_pools(&cfg, store, None).unwrap();
    assert_eq!(second.snapshot("db").unwrap().total, 4);
}

#[test]
fn test_build_store_uses_state_dir() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(Some(dir.path().to_path_buf()));
    let store = build_store(&cfg).unwrap();
    build_pools(&cfg, store, None).unwrap();
    assert!(dir.path().join("pools").join("db.json").exists());
}

#[test]
fn test_engine_wires_shared_store() {
    let audit = Arc::new(Mutex::new(InMemoryAuditSink::new(16)));
    let engine = DispatchEngine::from_config_with_audit(config(None), Some(Box::new(audit.clone())))
        .unwrap();
    let lease = engine.pools().acquire_default("web", "tester").unwrap();
    assert!(engine.pools().release_lease(&lease).unwrap());

    let actions: Vec<AuditAction> = audit.lock().events().iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Acquire, AuditAction::Release]);

    assert_eq!(engine.planner().config().max_per_class, 8);
    assert_eq!(engine.ledger().stats().unwrap().patterns, 0);
    assert!(!engine.monitor().is_running());
}
