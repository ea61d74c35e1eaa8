//! Configuration models for pools, the ledger, the planner and the dispatcher.

pub mod dispatch;
pub mod pool;

pub use dispatch::{
    DispatchConfig, DispatcherConfig, LedgerConfig, PlannerConfig, StoreConfig, CONFIG_ENV,
    STATE_DIR_ENV,
};
pub use pool::{HealthThresholds, PoolConfig, ResourceSpec};
