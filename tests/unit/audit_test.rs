//! Tests for audit sink

use std::sync::Arc;

use fix_dispatch::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};
use parking_lot::Mutex;

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        "web",
        AuditAction::Acquire,
        Some("web-0".to_string()),
        Some("worker-1".to_string()),
        None,
    );

    sink.record(event);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pool, "web");
    assert_eq!(events[0].action, AuditAction::Acquire);
    assert_eq!(events[0].resource_id.as_deref(), Some("web-0"));
    assert_eq!(events[0].holder.as_deref(), Some("worker-1"));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("web", AuditAction::Acquire, None, None, Some("1".into())));
    sink.record(build_audit_event("web", AuditAction::Release, None, None, Some("2".into())));
    sink.record(build_audit_event("web", AuditAction::Grow, None, None, Some("3".into())));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].detail.as_deref(), Some("2")); // First one popped
    assert_eq!(events[1].action, AuditAction::Grow);
}

#[test]
fn test_zero_capacity_sink_records_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event("web", AuditAction::Timeout, None, None, None));
    assert!(sink.events().is_empty());
}

#[test]
fn test_shared_sink_is_observable() {
    let shared = Arc::new(Mutex::new(InMemoryAuditSink::new(8)));
    let mut handle: Box<dyn AuditSink> = Box::new(Arc::clone(&shared));
    handle.record(build_audit_event("db", AuditAction::Shrink, Some("db-3".into()), None, None));
    assert_eq!(shared.lock().events().len(), 1);
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(
        "web",
        AuditAction::Release,
        Some("web-2".to_string()),
        Some("CS0535#0".to_string()),
        Some("ok".to_string()),
    );
    assert!(event.event_id.starts_with("web-release-web-2-"));
    assert!(event.created_at_ms > 0);
    assert_eq!(event.detail.as_deref(), Some("ok"));
}

#[test]
fn test_same_millisecond_events_get_distinct_ids() {
    let ids: std::collections::HashSet<String> = (0..100)
        .map(|_| build_audit_event("web", AuditAction::Acquire, Some("web-0".into()), None, None))
        .map(|event| event.event_id)
        .collect();
    assert_eq!(ids.len(), 100);
    assert!(ids.iter().all(|id| id.starts_with("web-acquire-web-0-")));
}
