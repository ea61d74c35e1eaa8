//! Planning, pattern learning, resource leasing and dispatch.

pub mod audit;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod pattern;
pub mod planner;
pub mod resource_pool;

#[cfg(not(target_arch = "wasm32"))]
pub mod dispatcher;
#[cfg(not(target_arch = "wasm32"))]
pub mod health;

pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use error::{AppResult, DispatchError};
pub use executor::{DryRunExecutor, FixExecutor, FixJob, FixReport, PatternSource};
pub use ledger::{class_family, ExpireReport, LearnOutcome, LedgerStats, OutcomeAck, PatternLedger};
pub use pattern::{FixContent, Pattern, PatternType};
pub use planner::{
    category, parse_reports, severity, units_needed, ErrorCategory, ErrorReport, Planner,
    SkippedClass, SpawnPlan, SpawnUnit, Strategy,
};
pub use resource_pool::{
    HealthReport, HealthStatus, LeaseDescriptor, PoolDocument, PoolRegistry, PoolResource,
    PoolSnapshot, PoolStats, ResizeAction, ResourceStatus,
};

#[cfg(not(target_arch = "wasm32"))]
pub use dispatcher::{DispatchReport, Dispatcher, UnitOutcome, UnitResult};
#[cfg(not(target_arch = "wasm32"))]
pub use health::{HealthMonitor, MonitorTick};
