//! Error types for pool, ledger and planner operations.

use thiserror::Error;

/// Errors produced by dispatch components.
///
/// Pool and ledger operations return these as explicit status values; they
/// never panic their caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Invalid pool or pattern parameters. Fatal to the call.
    #[error("config error: {0}")]
    Config(String),
    /// No lease could be obtained before the caller's timeout.
    #[error("acquire timed out on pool `{pool}` after {waited_ms}ms")]
    AcquireTimeout {
        /// Pool the caller tried to lease from.
        pool: String,
        /// Time spent waiting.
        waited_ms: u128,
    },
    /// The critical section stayed held by someone else for every retry.
    #[error("lock contention on `{key}` after {attempts} attempts")]
    LockContention {
        /// Store key whose lock could not be taken.
        key: String,
        /// Number of lock attempts made.
        attempts: u32,
    },
    /// Unknown pool, pattern or plan identifier on a targeted operation.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up (`pool`, `pattern`, `plan`).
        kind: &'static str,
        /// The identifier that did not resolve.
        id: String,
    },
    /// Planner input could not be parsed; the whole pass is abandoned.
    #[error("stale or unparseable report: {0}")]
    StaleData(String),
    /// Storage or encoding failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl DispatchError {
    /// Whether the caller may retry the same call (with backoff).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquireTimeout { .. } | Self::LockContention { .. })
    }

    /// Shorthand for a [`DispatchError::NotFound`] value.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
