//! Fully wired dispatch engine: one store shared by the pools, the ledger and
//! the planner.

use std::sync::Arc;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

use anyhow::Context;

use crate::builders::pool_builder::{build_ledger, build_planner, build_pools, build_store};
use crate::config::DispatchConfig;
use crate::core::{AppResult, AuditSink, PatternLedger, Planner, PoolRegistry};
use crate::infra::store::DocumentStore;

#[cfg(not(target_arch = "wasm32"))]
use crate::core::{DispatchReport, Dispatcher, FixExecutor, HealthMonitor};

/// Components built from one [`DispatchConfig`].
pub struct DispatchEngine {
    config: DispatchConfig,
    store: Arc<dyn DocumentStore>,
    pools: Arc<PoolRegistry>,
    ledger: Arc<PatternLedger>,
    planner: Planner,
}

impl DispatchEngine {
    /// Build every component from `config`.
    pub fn from_config(config: DispatchConfig) -> AppResult<Self> {
        Self::from_config_with_audit(config, None)
    }

    /// Build every component, reporting pool events to `audit`.
    pub fn from_config_with_audit(
        config: DispatchConfig,
        audit: Option<Box<dyn AuditSink>>,
    ) -> AppResult<Self> {
        let store = build_store(&config).context("opening state store")?;
        let pools = build_pools(&config, Arc::clone(&store), audit).context("opening pools")?;
        let ledger = build_ledger(&config, Arc::clone(&store));
        let planner = build_planner(&config, Arc::clone(&store));
        tracing::info!(pools = config.pools.len(), "dispatch engine ready");
        Ok(Self {
            config,
            store,
            pools: Arc::new(pools),
            ledger: Arc::new(ledger),
            planner,
        })
    }

    /// Build from the file named by `FIX_DISPATCH_CONFIG`.
    pub fn from_env() -> AppResult<Self> {
        let config = DispatchConfig::from_env()
            .map_err(anyhow::Error::msg)
            .context("loading configuration from environment")?;
        Self::from_config(config)
    }

    /// Configuration the engine was built from.
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Shared store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    /// Pool registry.
    #[must_use]
    pub fn pools(&self) -> Arc<PoolRegistry> {
        Arc::clone(&self.pools)
    }

    /// Pattern ledger.
    #[must_use]
    pub fn ledger(&self) -> Arc<PatternLedger> {
        Arc::clone(&self.ledger)
    }

    /// Planner.
    #[must_use]
    pub const fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Health monitor over every pool, expiring the ledger on each tick when
    /// soft expiry is configured. Not started.
    #[cfg(not(target_arch = "wasm32"))]
    #[must_use]
    pub fn monitor(&self) -> HealthMonitor {
        let monitor = HealthMonitor::new(
            self.pools(),
            Duration::from_secs(self.config.health_interval_secs),
        );
        match self.config.ledger.soft_expire_days {
            Some(days) => monitor.with_ledger_expiry(self.ledger(), days),
            None => monitor,
        }
    }

    /// Dispatcher driving `executor` with the configured worker settings.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn dispatcher<E: FixExecutor>(&self, executor: E) -> AppResult<Dispatcher<E>> {
        Ok(Dispatcher::new(
            self.pools(),
            self.ledger(),
            executor,
            self.config.dispatcher.clone(),
        )?)
    }

    /// Plan a raw error report, persist the plan and dispatch it.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn run_report<E: FixExecutor>(&self, raw: &str, executor: E) -> AppResult<DispatchReport> {
        let plan = self.planner.plan_raw(raw).context("planning error report")?;
        self.planner.persist(&plan).context("persisting plan")?;
        let report = self
            .dispatcher(executor)?
            .run(&plan)
            .with_context(|| format!("dispatching plan {}", plan.id))?;
        Ok(report)
    }
}
