//! Builders wiring configuration into runnable components.

pub mod engine;
pub mod pool_builder;

pub use engine::DispatchEngine;
pub use pool_builder::{build_ledger, build_planner, build_pools, build_store};
