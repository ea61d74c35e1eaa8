//! Root configuration for the dispatch engine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::PoolConfig;
use crate::core::planner::Strategy;
use crate::infra::store::validate_key_segment;

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "FIX_DISPATCH_CONFIG";
/// Environment variable overriding `state_dir`.
pub const STATE_DIR_ENV: &str = "FIX_DISPATCH_STATE_DIR";

/// Lock retry policy for the file-backed store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Attempts to take a document lock before reporting contention.
    pub lock_attempts: u32,
    /// Sleep between lock attempts in milliseconds.
    pub lock_retry_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_attempts: 200,
            lock_retry_ms: 10,
        }
    }
}

/// Pattern ledger tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Patterns idle longer than this are hidden from queries. `None`
    /// disables soft expiry.
    pub soft_expire_days: Option<u64>,
    /// Minimum success rate for similarity fallback matches.
    pub similarity_floor: f64,
    /// Digits of the numeric part kept in a class family (`CS0535` -> `CS05`).
    pub family_digits: usize,
    /// How long recorded attempt ids are kept for duplicate suppression.
    pub attempt_retention_days: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            soft_expire_days: Some(30),
            similarity_floor: 0.5,
            family_digits: 2,
            attempt_retention_days: 7,
        }
    }
}

impl LedgerConfig {
    /// Validate ledger settings.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.similarity_floor) {
            return Err("similarity_floor must be within [0, 1]".into());
        }
        if self.family_digits == 0 {
            return Err("family_digits must be greater than 0".into());
        }
        Ok(())
    }
}

/// Planner tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Classes reported fewer times than this are skipped as noise.
    pub min_threshold: u32,
    /// Upper bound on units spawned for one class.
    pub max_per_class: u32,
    /// Unit-count strategy.
    pub strategy: Strategy,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_threshold: 1,
            max_per_class: 8,
            strategy: Strategy::Balanced,
        }
    }
}

impl PlannerConfig {
    /// Validate planner settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_per_class == 0 {
            return Err("max_per_class must be greater than 0".into());
        }
        Ok(())
    }
}

/// Dispatcher worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Worker threads executing units.
    pub worker_count: usize,
    /// Bounded depth of the unit channel.
    pub queue_depth: usize,
    /// Pool leases are taken from.
    pub pool: String,
    /// Per-unit acquire timeout; the pool's default when absent.
    pub acquire_timeout_ms: Option<u64>,
    /// Stack size for worker threads in bytes.
    pub thread_stack_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            queue_depth: 64,
            pool: "default".into(),
            acquire_timeout_ms: None,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl DispatcherConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    /// Set the pool name.
    #[must_use]
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = pool.into();
        self
    }

    /// Set the per-unit acquire timeout.
    #[must_use]
    pub const fn with_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = Some(ms);
        self
    }

    /// Validate dispatcher settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.queue_depth == 0 {
            return Err("queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64KiB".into());
        }
        validate_key_segment(&self.pool).map_err(|e| format!("dispatcher pool: {e}"))
    }
}

const fn default_health_interval_secs() -> u64 {
    30
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Directory for the file-backed store; in-memory when absent.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Map of pool name to configuration.
    pub pools: HashMap<String, PoolConfig>,
    /// Store lock policy.
    #[serde(default)]
    pub store: StoreConfig,
    /// Ledger tuning.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Planner tuning.
    #[serde(default)]
    pub planner: PlannerConfig,
    /// Dispatcher settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Period of the pool health check in seconds.
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
}

impl DispatchConfig {
    /// Validate all sections and ensure at least one pool exists.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            validate_key_segment(name).map_err(|e| format!("pool `{name}` invalid: {e}"))?;
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        if !self.pools.contains_key(&self.dispatcher.pool) {
            return Err(format!(
                "dispatcher pool `{}` is not defined",
                self.dispatcher.pool
            ));
        }
        if self.health_interval_secs == 0 {
            return Err("health_interval_secs must be greater than 0".into());
        }
        self.ledger.validate()?;
        self.planner.validate()?;
        self.dispatcher.validate()
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read configuration from a JSON file and validate.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Load configuration from the file named by `FIX_DISPATCH_CONFIG`,
    /// reading `.env` first. `FIX_DISPATCH_STATE_DIR` overrides `state_dir`.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let path = std::env::var(CONFIG_ENV).map_err(|_| format!("{CONFIG_ENV} is not set"))?;
        let mut cfg = Self::from_path(path)?;
        if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
            cfg.state_dir = Some(PathBuf::from(dir));
        }
        Ok(cfg)
    }
}
