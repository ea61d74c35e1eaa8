//! Persistent ledger of fix patterns keyed by error class.
//!
//! Pattern metadata, the class index and recorded attempt ids live in one
//! document (`ledger/index`) so every outcome update and every expiry is a
//! single transaction. Fix content is appended to a JSON-lines log
//! (`ledger/content`) and compacted when patterns expire.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;
use crate::core::pattern::{success_rate, FixContent, Pattern, PatternType};
use crate::core::DispatchError;
use crate::infra::store::{read_json, update_json, DocumentStore};
use crate::util::clock::{days_to_ms, now_ms};
use crate::util::serde::{AttemptId, PatternId};

const INDEX_KEY: &str = "ledger/index";
const CONTENT_KEY: &str = "ledger/content";

/// Pattern metadata as stored in the index (content lives in the log).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PatternRecord {
    error_class: String,
    pattern_type: PatternType,
    success_count: u64,
    failure_count: u64,
    created_at_ms: u128,
    last_used_at_ms: u128,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl PatternRecord {
    fn record(&mut self, success: bool, now: u128) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_used_at_ms = now;
    }

    fn success_rate(&self) -> f64 {
        success_rate(self.success_count, self.failure_count)
    }

    fn into_pattern(self, id: PatternId, content: FixContent) -> Pattern {
        Pattern {
            id,
            error_class: self.error_class,
            pattern_type: self.pattern_type,
            content,
            success_count: self.success_count,
            failure_count: self.failure_count,
            created_at_ms: self.created_at_ms,
            last_used_at_ms: self.last_used_at_ms,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerIndex {
    patterns: BTreeMap<PatternId, PatternRecord>,
    by_class: BTreeMap<String, Vec<PatternId>>,
    /// Attempt id -> time it was recorded.
    attempts: BTreeMap<AttemptId, u128>,
}

impl LedgerIndex {
    fn insert(&mut self, id: PatternId, record: PatternRecord) {
        self.by_class
            .entry(record.error_class.clone())
            .or_default()
            .push(id.clone());
        self.patterns.insert(id, record);
    }

    fn remove(&mut self, id: &PatternId) {
        if let Some(record) = self.patterns.remove(id) {
            if let Some(ids) = self.by_class.get_mut(&record.error_class) {
                ids.retain(|other| other != id);
                if ids.is_empty() {
                    self.by_class.remove(&record.error_class);
                }
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentLine {
    id: PatternId,
    content: FixContent,
}

/// Acknowledgement of a recorded outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeAck {
    /// The outcome was counted.
    Recorded {
        /// Pattern updated.
        pattern_id: PatternId,
        /// Success rate after the update.
        success_rate: f64,
    },
    /// The attempt id was already recorded; nothing changed.
    Duplicate {
        /// Attempt id seen before.
        attempt_id: AttemptId,
    },
}

/// Result of [`PatternLedger::learn`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LearnOutcome {
    /// An existing pattern matched and the outcome was applied to it.
    Updated {
        /// Acknowledgement for the matched pattern.
        ack: OutcomeAck,
    },
    /// A new pattern was stored with one recorded success.
    Created {
        /// New pattern id.
        pattern_id: PatternId,
    },
    /// A failure with no matching pattern; nothing stored.
    Ignored,
}

/// Counts removed by an expiry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireReport {
    /// Patterns deleted.
    pub removed_patterns: usize,
    /// Attempt ids pruned from the idempotency set.
    pub pruned_attempts: usize,
    /// Content log lines dropped by compaction.
    pub compacted_lines: usize,
}

/// Summary for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Stored patterns.
    pub patterns: usize,
    /// Distinct error classes with at least one pattern.
    pub classes: usize,
    /// Sum of recorded successes.
    pub successes: u64,
    /// Sum of recorded failures.
    pub failures: u64,
    /// Attempt ids currently retained.
    pub tracked_attempts: usize,
}

/// Prefix family of an error class: alphabetic prefix plus the first
/// `digits` digits (`CS0535` -> `CS05`, `E100` -> `E10`).
#[must_use]
pub fn class_family(error_class: &str, digits: usize) -> String {
    let prefix: String = error_class
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    let numbers: String = error_class[prefix.len()..]
        .chars()
        .take_while(char::is_ascii_digit)
        .take(digits)
        .collect();
    format!("{}{numbers}", prefix.to_ascii_uppercase())
}

fn rank(a: &Pattern, b: &Pattern) -> Ordering {
    b.success_rate()
        .total_cmp(&a.success_rate())
        .then_with(|| a.usage().cmp(&b.usage()))
        .then_with(|| a.created_at_ms.cmp(&b.created_at_ms))
        .then_with(|| a.id.cmp(&b.id))
}

/// Registry of fix patterns with outcome counters and success ranking.
pub struct PatternLedger {
    store: Arc<dyn DocumentStore>,
    config: LedgerConfig,
}

impl PatternLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Ledger configuration.
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn load_index(&self) -> Result<LedgerIndex, DispatchError> {
        Ok(read_json::<LedgerIndex>(self.store.as_ref(), INDEX_KEY)?.unwrap_or_default())
    }

    /// Latest content per pattern id. Unparseable lines are skipped.
    fn load_contents(&self) -> Result<HashMap<PatternId, FixContent>, DispatchError> {
        let mut contents = HashMap::new();
        for (n, line) in self.store.read_lines(CONTENT_KEY)?.iter().enumerate() {
            match serde_json::from_str::<ContentLine>(line) {
                Ok(entry) => {
                    contents.insert(entry.id, entry.content);
                }
                Err(err) => {
                    tracing::warn!(line = n + 1, error = %err, "skipping corrupt content line");
                }
            }
        }
        Ok(contents)
    }

    fn append_content(&self, id: &PatternId, content: &FixContent) -> Result<(), DispatchError> {
        let line = serde_json::to_string(&ContentLine {
            id: id.clone(),
            content: content.clone(),
        })
        .map_err(|e| DispatchError::Backend(format!("cannot encode pattern content: {e}")))?;
        self.store.append_line(CONTENT_KEY, &line)
    }

    fn soft_expired(&self, record: &PatternRecord, now: u128) -> bool {
        self.config
            .soft_expire_days
            .is_some_and(|days| now.saturating_sub(record.last_used_at_ms) > days_to_ms(days))
    }

    /// Assemble live patterns for the given ids.
    fn assemble<'a>(
        &self,
        index: &LedgerIndex,
        contents: &HashMap<PatternId, FixContent>,
        ids: impl Iterator<Item = &'a PatternId>,
        now: u128,
    ) -> Vec<Pattern> {
        ids.filter_map(|id| {
            let record = index.patterns.get(id)?;
            if self.soft_expired(record, now) {
                return None;
            }
            let Some(content) = contents.get(id) else {
                tracing::warn!(pattern = %id, "pattern has no stored content");
                return None;
            };
            Some(record.clone().into_pattern(id.clone(), content.clone()))
        })
        .collect()
    }

    /// Store a new zero-count pattern. No deduplication is performed.
    ///
    /// # Errors
    ///
    /// `Config` for an empty error class; store errors.
    pub fn store(
        &self,
        error_class: &str,
        pattern_type: PatternType,
        content: FixContent,
        metadata: BTreeMap<String, String>,
    ) -> Result<PatternId, DispatchError> {
        if error_class.trim().is_empty() {
            return Err(DispatchError::Config("error class must not be empty".into()));
        }
        let id = update_json::<LedgerIndex, PatternId, _>(self.store.as_ref(), INDEX_KEY, |index| {
            let mut index = index.unwrap_or_default();
            let id = PatternId::new();
            let now = now_ms();
            self.append_content(&id, &content)?;
            index.insert(
                id.clone(),
                PatternRecord {
                    error_class: error_class.to_string(),
                    pattern_type,
                    success_count: 0,
                    failure_count: 0,
                    created_at_ms: now,
                    last_used_at_ms: now,
                    metadata,
                },
            );
            Ok((Some(index), id))
        })?;
        tracing::info!(pattern = %id, error_class, pattern_type = %pattern_type, "pattern stored");
        Ok(id)
    }

    /// Live patterns of `error_class` with `success_rate >= min_success_rate`,
    /// best first: success rate descending, then least used, then oldest.
    pub fn retrieve(
        &self,
        error_class: &str,
        min_success_rate: f64,
    ) -> Result<Vec<Pattern>, DispatchError> {
        let index = self.load_index()?;
        let Some(ids) = index.by_class.get(error_class) else {
            return Ok(Vec::new());
        };
        let contents = self.load_contents()?;
        let mut patterns: Vec<Pattern> = self
            .assemble(&index, &contents, ids.iter(), now_ms())
            .into_iter()
            .filter(|p| p.success_rate() >= min_success_rate)
            .collect();
        patterns.sort_by(rank);
        Ok(patterns)
    }

    /// Highest-ranked live pattern of `error_class`, if any.
    pub fn best(&self, error_class: &str) -> Result<Option<Pattern>, DispatchError> {
        Ok(self.retrieve(error_class, 0.0)?.into_iter().next())
    }

    /// Count one outcome for `pattern_id`.
    ///
    /// A repeated `attempt_id` is acknowledged as [`OutcomeAck::Duplicate`]
    /// and not counted again.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown pattern id; store errors.
    pub fn record_outcome(
        &self,
        pattern_id: &PatternId,
        success: bool,
        attempt_id: &AttemptId,
    ) -> Result<OutcomeAck, DispatchError> {
        let ack =
            update_json::<LedgerIndex, OutcomeAck, _>(self.store.as_ref(), INDEX_KEY, |index| {
                let mut index = index
                    .ok_or_else(|| DispatchError::not_found("pattern", pattern_id.0.clone()))?;
                if index.attempts.contains_key(attempt_id) {
                    return Ok((
                        None,
                        OutcomeAck::Duplicate {
                            attempt_id: attempt_id.clone(),
                        },
                    ));
                }
                let now = now_ms();
                let record = index
                    .patterns
                    .get_mut(pattern_id)
                    .ok_or_else(|| DispatchError::not_found("pattern", pattern_id.0.clone()))?;
                record.record(success, now);
                let success_rate = record.success_rate();
                index.attempts.insert(attempt_id.clone(), now);
                Ok((
                    Some(index),
                    OutcomeAck::Recorded {
                        pattern_id: pattern_id.clone(),
                        success_rate,
                    },
                ))
            })?;
        match &ack {
            OutcomeAck::Recorded { success_rate, .. } => {
                tracing::info!(
                    pattern = %pattern_id,
                    attempt = %attempt_id,
                    success,
                    success_rate,
                    "outcome recorded"
                );
            }
            OutcomeAck::Duplicate { .. } => {
                tracing::debug!(
                    pattern = %pattern_id,
                    attempt = %attempt_id,
                    "duplicate outcome ignored"
                );
            }
        }
        Ok(ack)
    }

    /// Learn from one fix attempt described in free text.
    ///
    /// The type tag is derived from the description. A pattern of the same
    /// class, type and content gets the outcome; otherwise a success stores a
    /// new pattern with one recorded success and a failure is ignored.
    pub fn learn(
        &self,
        error_class: &str,
        fix_description: &str,
        success: bool,
        attempt_id: &AttemptId,
    ) -> Result<LearnOutcome, DispatchError> {
        self.learn_content(
            error_class,
            PatternType::from_description(fix_description),
            FixContent::opaque(fix_description),
            BTreeMap::from([("source".to_string(), "learned".to_string())]),
            success,
            attempt_id,
        )
    }

    /// Learn from an attempt on `error_class` that applied `borrowed`, a
    /// pattern of a sibling class.
    ///
    /// The borrowed pattern's typed content and type tag are kept, so a
    /// `Shell` fix stays a `Shell` fix under the new class. Matching and
    /// failure handling follow [`learn`](Self::learn).
    pub fn adopt(
        &self,
        error_class: &str,
        borrowed: &Pattern,
        success: bool,
        attempt_id: &AttemptId,
    ) -> Result<LearnOutcome, DispatchError> {
        self.learn_content(
            error_class,
            borrowed.pattern_type,
            borrowed.content.clone(),
            BTreeMap::from([
                ("source".to_string(), "adopted".to_string()),
                ("adopted_from".to_string(), borrowed.id.to_string()),
            ]),
            success,
            attempt_id,
        )
    }

    fn learn_content(
        &self,
        error_class: &str,
        pattern_type: PatternType,
        content: FixContent,
        metadata: BTreeMap<String, String>,
        success: bool,
        attempt_id: &AttemptId,
    ) -> Result<LearnOutcome, DispatchError> {
        if error_class.trim().is_empty() {
            return Err(DispatchError::Config("error class must not be empty".into()));
        }
        let outcome =
            update_json::<LedgerIndex, LearnOutcome, _>(self.store.as_ref(), INDEX_KEY, |index| {
                let mut index = index.unwrap_or_default();
                if index.attempts.contains_key(attempt_id) {
                    let ack = OutcomeAck::Duplicate {
                        attempt_id: attempt_id.clone(),
                    };
                    return Ok((None, LearnOutcome::Updated { ack }));
                }
                let now = now_ms();
                let contents = self.load_contents()?;
                let matched = index.by_class.get(error_class).and_then(|ids| {
                    ids.iter()
                        .find(|id| {
                            index
                                .patterns
                                .get(*id)
                                .is_some_and(|r| r.pattern_type == pattern_type)
                                && contents.get(*id) == Some(&content)
                        })
                        .cloned()
                });

                if let Some(id) = matched {
                    let Some(record) = index.patterns.get_mut(&id) else {
                        return Err(DispatchError::not_found("pattern", id.0));
                    };
                    record.record(success, now);
                    let success_rate = record.success_rate();
                    index.attempts.insert(attempt_id.clone(), now);
                    let ack = OutcomeAck::Recorded {
                        pattern_id: id,
                        success_rate,
                    };
                    return Ok((Some(index), LearnOutcome::Updated { ack }));
                }
                if !success {
                    return Ok((None, LearnOutcome::Ignored));
                }

                let id = PatternId::new();
                self.append_content(&id, &content)?;
                index.insert(
                    id.clone(),
                    PatternRecord {
                        error_class: error_class.to_string(),
                        pattern_type,
                        success_count: 1,
                        failure_count: 0,
                        created_at_ms: now,
                        last_used_at_ms: now,
                        metadata,
                    },
                );
                index.attempts.insert(attempt_id.clone(), now);
                Ok((Some(index), LearnOutcome::Created { pattern_id: id }))
            })?;

        tracing::info!(
            error_class,
            pattern_type = %pattern_type,
            success,
            outcome = ?outcome,
            "learned from attempt"
        );
        Ok(outcome)
    }

    /// Patterns from sibling classes of the same prefix family with a
    /// success rate at or above the configured floor. Patterns whose type
    /// matches the one derived from `message` rank first.
    pub fn find_similar(
        &self,
        error_class: &str,
        message: &str,
    ) -> Result<Vec<Pattern>, DispatchError> {
        let digits = self.config.family_digits;
        let family = class_family(error_class, digits);
        let wanted = PatternType::from_description(message);
        let index = self.load_index()?;
        let ids: Vec<&PatternId> = index
            .by_class
            .iter()
            .filter(|(class, _)| {
                class.as_str() != error_class && class_family(class, digits) == family
            })
            .flat_map(|(_, ids)| ids.iter())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let contents = self.load_contents()?;
        let mut patterns: Vec<Pattern> = self
            .assemble(&index, &contents, ids.into_iter(), now_ms())
            .into_iter()
            .filter(|p| p.success_rate() >= self.config.similarity_floor)
            .collect();
        patterns.sort_by(|a, b| {
            (b.pattern_type == wanted)
                .cmp(&(a.pattern_type == wanted))
                .then_with(|| rank(a, b))
        });
        Ok(patterns)
    }

    /// Remove patterns idle for more than `max_idle_days`.
    pub fn expire(&self, max_idle_days: u64) -> Result<ExpireReport, DispatchError> {
        self.expire_at(max_idle_days, now_ms())
    }

    /// [`expire`](Self::expire) evaluated at time `now` (milliseconds since
    /// epoch).
    ///
    /// Patterns and the class index are updated in one transaction; attempt
    /// ids older than the retention window are pruned and the content log
    /// is compacted inside the same critical section.
    pub fn expire_at(&self, max_idle_days: u64, now: u128) -> Result<ExpireReport, DispatchError> {
        let pattern_cutoff = days_to_ms(max_idle_days);
        let attempt_cutoff = days_to_ms(self.config.attempt_retention_days);

        let report =
            update_json::<LedgerIndex, ExpireReport, _>(self.store.as_ref(), INDEX_KEY, |index| {
                let Some(mut index) = index else {
                    return Ok((None, ExpireReport::default()));
                };
                let stale: Vec<PatternId> = index
                    .patterns
                    .iter()
                    .filter(|(_, r)| now.saturating_sub(r.last_used_at_ms) > pattern_cutoff)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in &stale {
                    index.remove(id);
                }
                let before = index.attempts.len();
                index
                    .attempts
                    .retain(|_, at| now.saturating_sub(*at) <= attempt_cutoff);

                let lines = self.store.read_lines(CONTENT_KEY)?;
                let mut seen = HashMap::new();
                for line in &lines {
                    if let Ok(entry) = serde_json::from_str::<ContentLine>(line) {
                        if index.patterns.contains_key(&entry.id) {
                            seen.insert(entry.id.clone(), line.clone());
                        }
                    }
                }
                let mut kept: Vec<(PatternId, String)> = seen.into_iter().collect();
                kept.sort_by(|a, b| a.0.cmp(&b.0));
                let kept: Vec<String> = kept.into_iter().map(|(_, line)| line).collect();

                let report = ExpireReport {
                    removed_patterns: stale.len(),
                    pruned_attempts: before - index.attempts.len(),
                    compacted_lines: lines.len() - kept.len(),
                };
                if report.compacted_lines > 0 {
                    self.store.rewrite_lines(CONTENT_KEY, &kept)?;
                }
                let changed = report.removed_patterns > 0 || report.pruned_attempts > 0;
                Ok((changed.then_some(index), report))
            })?;

        tracing::info!(
            max_idle_days,
            removed = report.removed_patterns,
            pruned_attempts = report.pruned_attempts,
            compacted = report.compacted_lines,
            "ledger expiry pass"
        );
        Ok(report)
    }

    /// Fetch one pattern by id, expired or not.
    ///
    /// # Errors
    ///
    /// `NotFound` when the id is unknown or its content is missing.
    pub fn get(&self, pattern_id: &PatternId) -> Result<Pattern, DispatchError> {
        let index = self.load_index()?;
        let record = index
            .patterns
            .get(pattern_id)
            .ok_or_else(|| DispatchError::not_found("pattern", pattern_id.0.clone()))?;
        let content = self
            .load_contents()?
            .remove(pattern_id)
            .ok_or_else(|| DispatchError::not_found("pattern content", pattern_id.0.clone()))?;
        Ok(record.clone().into_pattern(pattern_id.clone(), content))
    }

    /// Dirty-read summary of the ledger.
    pub fn stats(&self) -> Result<LedgerStats, DispatchError> {
        let index = self.load_index()?;
        Ok(LedgerStats {
            patterns: index.patterns.len(),
            classes: index.by_class.len(),
            successes: index.patterns.values().map(|r| r.success_count).sum(),
            failures: index.patterns.values().map(|r| r.failure_count).sum(),
            tracked_attempts: index.attempts.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::store::InMemoryStore;

    fn ledger() -> PatternLedger {
        PatternLedger::new(Arc::new(InMemoryStore::new()), LedgerConfig::default())
    }

    #[test]
    fn test_class_family() {
        assert_eq!(class_family("CS0535", 2), "CS05");
        assert_eq!(class_family("E100", 2), "E10");
        assert_eq!(class_family("ts2304", 2), "TS23");
        assert_eq!(class_family("E1", 2), "E1");
    }

    #[test]
    fn test_store_then_get() {
        let ledger = ledger();
        let content = FixContent::Shell {
            command: "dotnet restore".into(),
        };
        let id = ledger
            .store("CS0246", PatternType::AddImport, content.clone(), BTreeMap::new())
            .unwrap();
        let pattern = ledger.get(&id).unwrap();
        assert_eq!(pattern.content, content);
        assert_eq!(pattern.usage(), 0);
        assert_eq!(ledger.stats().unwrap().patterns, 1);
    }

    #[test]
    fn test_record_outcome_unknown_id() {
        let ledger = ledger();
        let err = ledger
            .record_outcome(&PatternId::from("nope"), true, &AttemptId::new())
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { .. }));
    }

    #[test]
    fn test_learn_failure_without_match_is_ignored() {
        let ledger = ledger();
        let outcome = ledger
            .learn("E100", "fix-A", false, &AttemptId::new())
            .unwrap();
        assert_eq!(outcome, LearnOutcome::Ignored);
        assert!(ledger.best("E100").unwrap().is_none());
    }

    #[test]
    fn test_expire_compacts_content_log() {
        let ledger = ledger();
        let id = ledger
            .store("E100", PatternType::General, FixContent::opaque("old"), BTreeMap::new())
            .unwrap();
        let created = ledger.get(&id).unwrap().created_at_ms;
        let report = ledger.expire_at(1, created + days_to_ms(2)).unwrap();
        assert_eq!(report.removed_patterns, 1);
        assert_eq!(report.compacted_lines, 1);
        assert!(ledger.store.read_lines(CONTENT_KEY).unwrap().is_empty());
    }
}
