//! Builders to construct stores, pools, the ledger and the planner from
//! configuration.

use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::core::{AuditSink, DispatchError, PatternLedger, Planner, PoolRegistry};
use crate::infra::store::{DocumentStore, FileStore, InMemoryStore};

/// File-backed store under `state_dir`, or an in-memory one when unset.
pub fn build_store(cfg: &DispatchConfig) -> Result<Arc<dyn DocumentStore>, DispatchError> {
    match &cfg.state_dir {
        Some(dir) => {
            tracing::info!(state_dir = %dir.display(), "using file-backed store");
            Ok(Arc::new(FileStore::open(dir, &cfg.store)?))
        }
        None => {
            tracing::info!("using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Open (or create) every configured pool in `store`.
pub fn build_pools(
    cfg: &DispatchConfig,
    store: Arc<dyn DocumentStore>,
    audit: Option<Box<dyn AuditSink>>,
) -> Result<PoolRegistry, DispatchError> {
    cfg.validate()
        .map_err(|e| DispatchError::Config(format!("config invalid: {e}")))?;

    let mut registry = PoolRegistry::new(store);
    if let Some(audit) = audit {
        registry = registry.with_audit(audit);
    }
    let mut names: Vec<&String> = cfg.pools.keys().collect();
    names.sort();
    for name in names {
        registry.open_or_create(name, cfg.pools[name].clone())?;
    }
    Ok(registry)
}

/// Pattern ledger over `store`.
#[must_use]
pub fn build_ledger(cfg: &DispatchConfig, store: Arc<dyn DocumentStore>) -> PatternLedger {
    PatternLedger::new(store, cfg.ledger.clone())
}

/// Planner persisting plans to `store`.
#[must_use]
pub fn build_planner(cfg: &DispatchConfig, store: Arc<dyn DocumentStore>) -> Planner {
    Planner::new(cfg.planner.clone(), store)
}
