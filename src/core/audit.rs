//! Lease audit trail.
//!
//! The resource pool reports every lease and capacity change to an optional
//! [`AuditSink`]; [`InMemoryAuditSink`] keeps a bounded buffer for tests and
//! diagnostics.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Pool action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A resource was leased.
    Acquire,
    /// A lease was returned.
    Release,
    /// An acquire gave up.
    Timeout,
    /// Resources were added.
    Grow,
    /// Idle resources were removed.
    Shrink,
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Pool the event belongs to.
    pub pool: String,
    /// Resource involved, if a single one.
    pub resource_id: Option<String>,
    /// Lease holder or requester, if any.
    pub holder: Option<String>,
    /// What happened.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Shared sink, so callers can keep a handle and inspect what was recorded.
impl<S: AuditSink> AuditSink for Arc<Mutex<S>> {
    fn record(&mut self, event: AuditEvent) {
        self.lock().record(event);
    }
}

/// Audit sink forwarding events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::debug!(
            pool = %event.pool,
            action = ?event.action,
            resource = event.resource_id.as_deref().unwrap_or("-"),
            holder = event.holder.as_deref().unwrap_or("-"),
            detail = event.detail.as_deref().unwrap_or(""),
            "pool audit"
        );
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    pool: impl Into<String>,
    action: AuditAction,
    resource_id: Option<String>,
    holder: Option<String>,
    detail: Option<String>,
) -> AuditEvent {
    let pool = pool.into();
    let created_at_ms = now_ms();
    let prefix =
        format!("{pool}-{action:?}-{}", resource_id.as_deref().unwrap_or("pool")).to_lowercase();
    AuditEvent {
        event_id: format!("{prefix}-{}", uuid::Uuid::new_v4()),
        pool,
        resource_id,
        holder,
        action,
        created_at_ms,
        detail,
    }
}
