//! Tests for utility modules

use fix_dispatch::util::clock::{days_to_ms, now_ms, MS_PER_DAY};
use fix_dispatch::util::serde::{AttemptId, PatternId, PlanId, ResourceId, ResourceKind};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
    assert_eq!(days_to_ms(2), 2 * MS_PER_DAY);
}

#[test]
fn test_generated_ids_are_unique() {
    assert_ne!(PatternId::new(), PatternId::new());
    assert_ne!(AttemptId::new(), AttemptId::new());
    assert_ne!(PlanId::new(), PlanId::new());
}

#[test]
fn test_ids_serialize_transparently() {
    let id = PatternId::from("abc");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    let back: PatternId = serde_json::from_str("\"abc\"").unwrap();
    assert_eq!(back, id);
}

#[test]
fn test_resource_ids_are_pool_scoped() {
    assert_eq!(ResourceId::for_pool("web", 3).to_string(), "web-3");
}

#[test]
fn test_resource_kind_serde() {
    assert_eq!(serde_json::to_string(&ResourceKind::Database).unwrap(), "\"database\"");
    let kind: ResourceKind = serde_json::from_str("\"api\"").unwrap();
    assert_eq!(kind, ResourceKind::Api);
    assert_eq!(ResourceKind::Cache.to_string(), "cache");
}

#[test]
fn test_init_tracing_is_idempotent() {
    fix_dispatch::util::telemetry::init_tracing();
    fix_dispatch::util::telemetry::init_tracing();
}
