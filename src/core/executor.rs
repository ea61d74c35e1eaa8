//! The seam to whatever actually applies a fix.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::pattern::Pattern;
use crate::core::planner::SpawnUnit;
use crate::core::resource_pool::LeaseDescriptor;
use crate::util::serde::AttemptId;

/// Where the pattern handed to the executor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    /// Best pattern of the unit's own class.
    Exact,
    /// Borrowed from a sibling class of the same family.
    Similar,
    /// Nothing known; the executor has to improvise.
    None,
}

/// One unit of work handed to the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixJob {
    /// The planned unit.
    pub unit: SpawnUnit,
    /// Pattern to apply, if one was found.
    pub pattern: Option<Pattern>,
    /// Provenance of `pattern`.
    pub source: PatternSource,
    /// Idempotency key the outcome is recorded under.
    pub attempt_id: AttemptId,
}

/// What the executor reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixReport {
    /// Whether the error class was repaired.
    pub success: bool,
    /// Free-text description of the fix that was applied. Used to learn
    /// new patterns.
    pub fix_description: String,
}

impl FixReport {
    /// Successful fix described by `description`.
    pub fn fixed(description: impl Into<String>) -> Self {
        Self {
            success: true,
            fix_description: description.into(),
        }
    }

    /// Failed fix described by `description`.
    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            success: false,
            fix_description: description.into(),
        }
    }
}

/// Applies fixes using a leased resource.
///
/// Each dispatcher worker owns a clone and drives it on its own
/// single-threaded tokio runtime.
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use fix_dispatch::core::{FixExecutor, FixJob, FixReport, LeaseDescriptor};
///
/// #[derive(Clone)]
/// struct Formatter;
///
/// #[async_trait]
/// impl FixExecutor for Formatter {
///     async fn apply(&self, job: FixJob, lease: LeaseDescriptor) -> FixReport {
///         FixReport::fixed(format!("ran dotnet format via {}", lease.connection_info))
///     }
/// }
/// ```
#[async_trait]
pub trait FixExecutor: Send + Sync + Clone + 'static {
    /// Apply `job` using `lease`. Never panics on a failed fix; report it.
    async fn apply(&self, job: FixJob, lease: LeaseDescriptor) -> FixReport;
}

/// Executor that applies nothing and reports the chosen pattern as
/// successful. Units without a pattern fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl FixExecutor for DryRunExecutor {
    async fn apply(&self, job: FixJob, lease: LeaseDescriptor) -> FixReport {
        match &job.pattern {
            Some(pattern) => {
                tracing::debug!(
                    class = %job.unit.class_code,
                    resource = %lease.resource_id,
                    fix = %pattern.content.summary(),
                    "dry run"
                );
                FixReport::fixed(pattern.content.summary())
            }
            None => FixReport::failed(String::new()),
        }
    }
}
