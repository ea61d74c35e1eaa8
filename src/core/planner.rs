//! Classification and dispatch planning.
//!
//! Turns a batch of build error reports into a bounded, priority-ordered
//! [`SpawnPlan`]. Parsing is all-or-nothing: an unreadable report fails the
//! whole pass instead of producing a partial plan.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::core::DispatchError;
use crate::infra::store::{read_json, update_json, DocumentStore};
use crate::util::clock::now_ms;
use crate::util::serde::PlanId;

const PLAN_PREFIX: &str = "plans";

/// How many units a class deserves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One unit per class.
    Conservative,
    /// Severity-weighted unit count.
    #[default]
    Balanced,
    /// One unit per 50 errors.
    Aggressive,
}

impl Strategy {
    /// Initial fix-strategy tag for a unit of the given severity.
    #[must_use]
    pub const fn for_severity(severity: u8) -> Self {
        match severity {
            3.. => Self::Aggressive,
            2 => Self::Balanced,
            _ => Self::Conservative,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
        })
    }
}

/// Coarse error category derived from the class-code prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The source does not parse.
    Syntax,
    /// Unknown type, member, namespace or module.
    MissingReference,
    /// Something is defined twice.
    DuplicateDefinition,
    /// Interface or abstract members are not implemented.
    InterfaceContract,
    /// Incompatible types.
    TypeMismatch,
    /// Misuse of async/await.
    AsyncUsage,
    /// Possible null dereference.
    Nullability,
    /// Unrecognized code.
    Other,
}

impl ErrorCategory {
    /// Blocking categories stop the build outright.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(
            self,
            Self::Syntax | Self::MissingReference | Self::DuplicateDefinition
        )
    }

    /// Functional categories compile-fail a feature rather than the build.
    #[must_use]
    pub const fn is_functional(self) -> bool {
        matches!(
            self,
            Self::InterfaceContract | Self::TypeMismatch | Self::AsyncUsage
        )
    }
}

/// Prefix table; the longest matching prefix wins.
const CATEGORY_PREFIXES: &[(&str, ErrorCategory)] = &[
    // C#
    ("CS10", ErrorCategory::Syntax),
    ("CS15", ErrorCategory::Syntax),
    ("CS1061", ErrorCategory::MissingReference),
    ("CS0103", ErrorCategory::MissingReference),
    ("CS0117", ErrorCategory::MissingReference),
    ("CS0234", ErrorCategory::MissingReference),
    ("CS0246", ErrorCategory::MissingReference),
    ("CS0101", ErrorCategory::DuplicateDefinition),
    ("CS0102", ErrorCategory::DuplicateDefinition),
    ("CS0111", ErrorCategory::DuplicateDefinition),
    ("CS0128", ErrorCategory::DuplicateDefinition),
    ("CS0534", ErrorCategory::InterfaceContract),
    ("CS0535", ErrorCategory::InterfaceContract),
    ("CS0738", ErrorCategory::InterfaceContract),
    ("CS0019", ErrorCategory::TypeMismatch),
    ("CS0029", ErrorCategory::TypeMismatch),
    ("CS0266", ErrorCategory::TypeMismatch),
    ("CS1503", ErrorCategory::TypeMismatch),
    ("CS40", ErrorCategory::AsyncUsage),
    ("CS1998", ErrorCategory::AsyncUsage),
    ("CS86", ErrorCategory::Nullability),
    // TypeScript
    ("TS1", ErrorCategory::Syntax),
    ("TS1308", ErrorCategory::AsyncUsage),
    ("TS2300", ErrorCategory::DuplicateDefinition),
    ("TS2304", ErrorCategory::MissingReference),
    ("TS2305", ErrorCategory::MissingReference),
    ("TS2307", ErrorCategory::MissingReference),
    ("TS2322", ErrorCategory::TypeMismatch),
    ("TS2345", ErrorCategory::TypeMismatch),
    ("TS2420", ErrorCategory::InterfaceContract),
    ("TS2531", ErrorCategory::Nullability),
    ("TS2532", ErrorCategory::Nullability),
    ("TS18048", ErrorCategory::Nullability),
    // pycodestyle / pyflakes
    ("E9", ErrorCategory::Syntax),
    ("F811", ErrorCategory::DuplicateDefinition),
    ("F821", ErrorCategory::MissingReference),
    ("F401", ErrorCategory::MissingReference),
];

/// Category of an error class code (case-insensitive longest-prefix lookup).
#[must_use]
pub fn category(class_code: &str) -> ErrorCategory {
    let code = class_code.trim().to_ascii_uppercase();
    CATEGORY_PREFIXES
        .iter()
        .filter(|(prefix, _)| code.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map_or(ErrorCategory::Other, |(_, category)| *category)
}

/// Severity 1..=3 for `count` errors of `class_code`.
#[must_use]
pub fn severity(class_code: &str, count: u64) -> u8 {
    let category = category(class_code);
    if count > 100 || category.is_blocking() {
        3
    } else if count > 20 || category.is_functional() {
        2
    } else {
        1
    }
}

/// Units to spawn for one class.
#[must_use]
pub fn units_needed(strategy: Strategy, severity: u8, count: u64, max_per_class: u32) -> u32 {
    let max = u64::from(max_per_class.max(1));
    let units = match strategy {
        Strategy::Conservative => 1,
        Strategy::Aggressive => count.div_ceil(50),
        Strategy::Balanced => u64::from(severity).saturating_mul(count.div_ceil(100)),
    };
    // Bounded by `max`, which came from a u32.
    u32::try_from(units.clamp(1, max)).unwrap_or(max_per_class)
}

/// One build error class as reported by the build-output analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Compiler error class, e.g. `CS0535`.
    #[serde(alias = "classCode", alias = "code")]
    pub class_code: String,
    /// Representative message.
    #[serde(default)]
    pub message: String,
    /// Occurrences in this build.
    #[serde(default = "default_count")]
    pub count: u64,
    /// Source locations, `file:line` form.
    #[serde(default, alias = "locations")]
    pub location: Vec<String>,
}

const fn default_count() -> u64 {
    1
}

impl ErrorReport {
    /// Report of `count` errors of `class_code`.
    pub fn new(class_code: impl Into<String>, count: u64) -> Self {
        Self {
            class_code: class_code.into(),
            message: String::new(),
            count,
            location: Vec::new(),
        }
    }

    /// Attach a representative message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReportInput {
    List(Vec<ErrorReport>),
    Wrapped { errors: Vec<ErrorReport> },
}

/// Parse a raw report: either a JSON array of reports or `{"errors": [...]}`.
///
/// # Errors
///
/// `StaleData` when the input does not parse or a class code is empty.
pub fn parse_reports(raw: &str) -> Result<Vec<ErrorReport>, DispatchError> {
    let reports = match serde_json::from_str::<ReportInput>(raw) {
        Ok(ReportInput::List(reports) | ReportInput::Wrapped { errors: reports }) => reports,
        Err(err) => return Err(DispatchError::StaleData(err.to_string())),
    };
    if let Some(pos) = reports.iter().position(|r| r.class_code.trim().is_empty()) {
        return Err(DispatchError::StaleData(format!("report #{pos} has an empty class code")));
    }
    Ok(reports)
}

/// One unit of repair work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnUnit {
    /// Error class to repair.
    pub class_code: String,
    /// Index of this unit among the class's units.
    pub instance_index: u32,
    /// Fix-strategy tag derived from severity.
    pub strategy: Strategy,
    /// `4 - severity`; lower is more urgent.
    pub priority: u8,
    /// Severity 1..=3.
    pub severity: u8,
    /// Category of the class.
    pub category: ErrorCategory,
    /// Total errors of this class.
    pub count: u64,
    /// Representative message.
    pub message: String,
}

/// A class left out of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedClass {
    /// Error class.
    pub class_code: String,
    /// Its total count, below the threshold.
    pub count: u64,
}

/// Priority-ordered output of one planning pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnPlan {
    /// Plan identifier.
    pub id: PlanId,
    /// Creation time in milliseconds since epoch.
    pub created_at_ms: u128,
    /// Unit-count strategy used.
    pub strategy: Strategy,
    /// Units in dispatch order.
    pub units: Vec<SpawnUnit>,
    /// Classes below the threshold.
    pub skipped: Vec<SkippedClass>,
}

struct ClassTotal {
    class_code: String,
    count: u64,
    message: String,
}

/// Builds spawn plans and keeps one document per plan.
pub struct Planner {
    config: PlannerConfig,
    store: Arc<dyn DocumentStore>,
}

impl Planner {
    /// Create a planner persisting plans to `store`.
    #[must_use]
    pub fn new(config: PlannerConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self { config, store }
    }

    /// Planner configuration.
    #[must_use]
    pub const fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan from parsed reports using the configured strategy.
    #[must_use]
    pub fn plan(&self, reports: &[ErrorReport]) -> SpawnPlan {
        self.plan_with(reports, self.config.strategy)
    }

    /// Plan from parsed reports with an explicit strategy.
    #[must_use]
    pub fn plan_with(&self, reports: &[ErrorReport], strategy: Strategy) -> SpawnPlan {
        // Sum duplicate classes, keeping first-seen order.
        let mut totals: Vec<ClassTotal> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        for report in reports {
            let class_code = report.class_code.trim().to_string();
            if let Some(&slot) = slots.get(&class_code) {
                let total = &mut totals[slot];
                total.count = total.count.saturating_add(report.count);
                if total.message.is_empty() {
                    total.message.clone_from(&report.message);
                }
            } else {
                slots.insert(class_code.clone(), totals.len());
                totals.push(ClassTotal {
                    class_code,
                    count: report.count,
                    message: report.message.clone(),
                });
            }
        }

        let mut units = Vec::new();
        let mut skipped = Vec::new();
        for total in totals {
            if total.count < u64::from(self.config.min_threshold) {
                tracing::debug!(
                    class = %total.class_code,
                    count = total.count,
                    "below threshold; skipped"
                );
                skipped.push(SkippedClass {
                    class_code: total.class_code,
                    count: total.count,
                });
                continue;
            }
            let severity = severity(&total.class_code, total.count);
            let category = category(&total.class_code);
            let n = units_needed(strategy, severity, total.count, self.config.max_per_class);
            for instance_index in 0..n {
                units.push(SpawnUnit {
                    class_code: total.class_code.clone(),
                    instance_index,
                    strategy: Strategy::for_severity(severity),
                    priority: 4 - severity,
                    severity,
                    category,
                    count: total.count,
                    message: total.message.clone(),
                });
            }
        }
        units.sort_by_key(|u| u.priority);

        let plan = SpawnPlan {
            id: PlanId::new(),
            created_at_ms: now_ms(),
            strategy,
            units,
            skipped,
        };
        tracing::info!(
            plan = %plan.id,
            strategy = %strategy,
            units = plan.units.len(),
            skipped = plan.skipped.len(),
            "spawn plan built"
        );
        plan
    }

    /// Parse `raw` and plan it.
    ///
    /// # Errors
    ///
    /// `StaleData` when the report does not parse; no plan is produced.
    pub fn plan_raw(&self, raw: &str) -> Result<SpawnPlan, DispatchError> {
        let reports = parse_reports(raw).inspect_err(|err| {
            tracing::warn!(error = %err, "planning pass abandoned");
        })?;
        Ok(self.plan(&reports))
    }

    /// Store `plan` as `plans/<id>`.
    pub fn persist(&self, plan: &SpawnPlan) -> Result<(), DispatchError> {
        let key = format!("{PLAN_PREFIX}/{}", plan.id);
        update_json::<SpawnPlan, (), _>(self.store.as_ref(), &key, |_| {
            Ok((Some(plan.clone()), ()))
        })?;
        tracing::debug!(plan = %plan.id, "plan persisted");
        Ok(())
    }

    /// Load a persisted plan.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown plan id.
    pub fn load(&self, plan_id: &PlanId) -> Result<SpawnPlan, DispatchError> {
        let key = format!("{PLAN_PREFIX}/{plan_id}");
        read_json::<SpawnPlan>(self.store.as_ref(), &key)?
            .ok_or_else(|| DispatchError::not_found("plan", plan_id.0.clone()))
    }

    /// Ids of all persisted plans.
    pub fn plan_ids(&self) -> Result<Vec<PlanId>, DispatchError> {
        let prefix = format!("{PLAN_PREFIX}/");
        Ok(self
            .store
            .list(PLAN_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(|id| PlanId(id.to_string())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_longest_prefix() {
        assert_eq!(category("CS1002"), ErrorCategory::Syntax);
        assert_eq!(category("CS1061"), ErrorCategory::MissingReference);
        assert_eq!(category("cs0535"), ErrorCategory::InterfaceContract);
        assert_eq!(category("CS4032"), ErrorCategory::AsyncUsage);
        assert_eq!(category("TS1308"), ErrorCategory::AsyncUsage);
        assert_eq!(category("TS1005"), ErrorCategory::Syntax);
        assert_eq!(category("E1"), ErrorCategory::Other);
    }

    #[test]
    fn test_severity_rules() {
        assert_eq!(severity("E1", 150), 3);
        assert_eq!(severity("E1", 21), 2);
        assert_eq!(severity("E1", 20), 1);
        assert_eq!(severity("CS1002", 1), 3);
        assert_eq!(severity("CS0535", 1), 2);
    }

    #[test]
    fn test_units_needed() {
        assert_eq!(units_needed(Strategy::Balanced, 3, 150, 8), 6);
        assert_eq!(units_needed(Strategy::Balanced, 3, 500, 8), 8);
        assert_eq!(units_needed(Strategy::Balanced, 1, 0, 8), 1);
        assert_eq!(units_needed(Strategy::Aggressive, 3, 101, 8), 3);
        assert_eq!(units_needed(Strategy::Conservative, 3, 1000, 8), 1);
    }

    #[test]
    fn test_parse_reports_shapes() {
        let list = parse_reports(r#"[{"classCode":"CS0535","count":3}]"#).unwrap();
        assert_eq!(list[0].class_code, "CS0535");
        let wrapped = parse_reports(r#"{"errors":[{"code":"E1","message":"m"}]}"#).unwrap();
        assert_eq!(wrapped[0].count, 1);
        assert!(matches!(parse_reports("{"), Err(DispatchError::StaleData(_))));
        assert!(matches!(
            parse_reports(r#"[{"class_code":" ","count":1}]"#),
            Err(DispatchError::StaleData(_))
        ));
    }
}
