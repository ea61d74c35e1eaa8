//! Integration tests for classification and dispatch planning.

use std::sync::Arc;

use fix_dispatch::config::PlannerConfig;
use fix_dispatch::core::{
    severity, DispatchError, ErrorCategory, ErrorReport, Planner, Strategy,
};
use fix_dispatch::infra::InMemoryStore;
use fix_dispatch::util::serde::PlanId;

fn planner(config: PlannerConfig) -> Planner {
    Planner::new(config, Arc::new(InMemoryStore::new()))
}

// Scenario: 150 errors of E1 under the balanced strategy.
#[test]
fn test_balanced_plan_for_large_class() {
    let planner = planner(PlannerConfig::default());
    let plan = planner.plan(&[ErrorReport::new("E1", 150)]);
    assert_eq!(plan.strategy, Strategy::Balanced);
    assert_eq!(plan.units.len(), 6);
    for (i, unit) in plan.units.iter().enumerate() {
        assert_eq!(unit.severity, 3);
        assert_eq!(unit.priority, 1);
        assert_eq!(unit.strategy, Strategy::Aggressive);
        assert_eq!(unit.instance_index, u32::try_from(i).unwrap());
    }
}

#[test]
fn test_units_capped_at_max_per_class() {
    let planner = planner(PlannerConfig {
        max_per_class: 4,
        ..PlannerConfig::default()
    });
    let plan = planner.plan(&[ErrorReport::new("E1", 150)]);
    assert_eq!(plan.units.len(), 4);

    let aggressive = planner.plan_with(&[ErrorReport::new("E1", 120)], Strategy::Aggressive);
    assert_eq!(aggressive.units.len(), 3);
    let conservative = planner.plan_with(&[ErrorReport::new("E1", 5000)], Strategy::Conservative);
    assert_eq!(conservative.units.len(), 1);
}

#[test]
fn test_units_sorted_by_priority() {
    let planner = planner(PlannerConfig::default());
    let plan = planner.plan(&[
        ErrorReport::new("E5", 3),       // severity 1
        ErrorReport::new("CS0535", 4),   // functional -> 2
        ErrorReport::new("CS1002", 1),   // syntax -> 3
        ErrorReport::new("W291", 30),    // count -> 2
    ]);
    let priorities: Vec<u8> = plan.units.iter().map(|u| u.priority).collect();
    assert!(priorities.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(plan.units.first().map(|u| u.class_code.as_str()), Some("CS1002"));
    assert_eq!(plan.units.last().map(|u| u.class_code.as_str()), Some("E5"));

    // Stable among equal priorities: input order is kept.
    let mut middle: Vec<&str> = plan
        .units
        .iter()
        .filter(|u| u.priority == 2)
        .map(|u| u.class_code.as_str())
        .collect();
    middle.dedup();
    assert_eq!(middle, vec!["CS0535", "W291"]);
}

#[test]
fn test_below_threshold_classes_are_skipped() {
    let planner = planner(PlannerConfig {
        min_threshold: 5,
        ..PlannerConfig::default()
    });
    let plan = planner.plan(&[
        ErrorReport::new("CS1002", 2),
        ErrorReport::new("CS0246", 5),
        ErrorReport::new("E1", 4),
    ]);
    assert!(plan.units.iter().all(|u| u.class_code == "CS0246"));
    let skipped: Vec<&str> = plan.skipped.iter().map(|s| s.class_code.as_str()).collect();
    assert_eq!(skipped, vec!["CS1002", "E1"]);
}

#[test]
fn test_duplicate_classes_are_summed() {
    let planner = planner(PlannerConfig::default());
    let plan = planner.plan(&[
        ErrorReport::new("E1", 60),
        ErrorReport::new("E1", 60).with_message("second"),
    ]);
    assert!(plan.units.iter().all(|u| u.count == 120 && u.severity == 3));
    assert_eq!(plan.units[0].message, "second");
}

#[test]
fn test_huge_duplicate_counts_saturate() {
    let planner = planner(PlannerConfig::default());
    let plan = planner.plan(&[
        ErrorReport::new("E1", u64::MAX),
        ErrorReport::new("E1", 1),
        ErrorReport::new("E1", u64::MAX),
    ]);
    assert_eq!(plan.units.len(), 8);
    assert!(plan.units.iter().all(|u| u.count == u64::MAX && u.severity == 3));

    let aggressive =
        planner.plan_with(&[ErrorReport::new("TS2322", u64::MAX)], Strategy::Aggressive);
    assert_eq!(aggressive.units.len(), 8);
}

#[test]
fn test_severity_is_monotonic_in_count() {
    for class in ["E1", "CS0535", "CS1002", "TS2322", "W291"] {
        let mut previous = 0;
        for count in 0..300 {
            let s = severity(class, count);
            assert!(s >= previous, "{class} severity dropped at {count}");
            assert!((1..=3).contains(&s));
            previous = s;
        }
    }
}

#[test]
fn test_units_carry_category() {
    let planner = planner(PlannerConfig::default());
    let plan = planner.plan(&[ErrorReport::new("CS0246", 1)]);
    assert_eq!(plan.units[0].category, ErrorCategory::MissingReference);
    assert_eq!(plan.units[0].severity, 3);
}

#[test]
fn test_plan_raw_parses_both_shapes() {
    let planner = planner(PlannerConfig::default());
    let plan = planner
        .plan_raw(
            r#"{"errors": [{"classCode": "CS0535", "message": "does not implement", "count": 3, "location": ["A.cs:10"]}]}"#,
        )
        .unwrap();
    assert_eq!(plan.units.len(), 2);
    assert_eq!(plan.units[0].message, "does not implement");

    let plan = planner.plan_raw(r#"[{"code": "E1", "count": 1}]"#).unwrap();
    assert_eq!(plan.units.len(), 1);
}

#[test]
fn test_unparseable_report_fails_the_pass() {
    let planner = planner(PlannerConfig::default());
    for raw in ["", "{\"errors\": 3}", "[{\"count\": 3}]", "[{\"code\": \"\", \"count\": 3}]"] {
        assert!(
            matches!(planner.plan_raw(raw), Err(DispatchError::StaleData(_))),
            "accepted {raw:?}"
        );
    }
}

#[test]
fn test_persist_and_load_plan() {
    let planner = planner(PlannerConfig::default());
    let plan = planner.plan(&[ErrorReport::new("CS0246", 40), ErrorReport::new("E1", 2)]);
    planner.persist(&plan).unwrap();

    let loaded = planner.load(&plan.id).unwrap();
    assert_eq!(loaded, plan);
    assert_eq!(planner.plan_ids().unwrap(), vec![plan.id.clone()]);
    assert!(matches!(
        planner.load(&PlanId("missing".into())),
        Err(DispatchError::NotFound { kind: "plan", .. })
    ));
}

#[test]
fn test_empty_report_gives_empty_plan() {
    let planner = planner(PlannerConfig::default());
    let plan = planner.plan_raw("[]").unwrap();
    assert!(plan.units.is_empty());
    assert!(plan.skipped.is_empty());
}
