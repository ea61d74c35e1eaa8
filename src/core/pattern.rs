//! Fix patterns: the learned repair procedures the ledger ranks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::serde::PatternId;

/// Repair procedure payload. The engine never interprets it; the executor
/// does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixContent {
    /// Command run in the leased environment.
    Shell {
        /// Command line.
        command: String,
    },
    /// Regex substitution over matching files.
    Regex {
        /// Pattern to search for.
        pattern: String,
        /// Replacement text, may reference capture groups.
        replacement: String,
        /// Optional glob restricting the files touched.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_glob: Option<String>,
    },
    /// Structured edit consumed by an executor that understands `edit`.
    StructuredEdit {
        /// File or symbol the edit applies to.
        target: String,
        /// Executor-defined edit payload.
        edit: serde_json::Value,
    },
    /// Uninterpreted bytes, e.g. a free-text fix description.
    Opaque {
        /// Raw payload.
        bytes: Vec<u8>,
    },
}

impl FixContent {
    /// Wrap a free-text description as opaque content.
    #[must_use]
    pub fn opaque(text: &str) -> Self {
        Self::Opaque {
            bytes: text.as_bytes().to_vec(),
        }
    }

    /// Short human-readable summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Shell { command } => format!("shell: {command}"),
            Self::Regex {
                pattern,
                replacement,
                ..
            } => format!("regex: s/{pattern}/{replacement}/"),
            Self::StructuredEdit { target, .. } => format!("edit: {target}"),
            Self::Opaque { bytes } => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Coarse tag describing what kind of repair a pattern performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Adds a missing import, using directive or reference.
    AddImport,
    /// Adds missing interface or trait members.
    ImplementInterface,
    /// Fixes async/await usage.
    AsyncAwait,
    /// Fixes indentation or whitespace.
    Indentation,
    /// Renames a symbol.
    Rename,
    /// Inserts a cast or conversion.
    TypeConversion,
    /// Adds null checks or nullable annotations.
    NullSafety,
    /// Anything else.
    General,
}

/// Keyword table, checked in order; the first hit wins.
///
/// Keywords match whole words. Words of four letters or more also match as
/// a prefix (`indent` hits `indentation`); shorter ones only match exactly,
/// so `tab` does not hit `table` or `database`.
const TYPE_KEYWORDS: &[(PatternType, &[&str])] = &[
    (PatternType::ImplementInterface, &["implement", "interface", "abstract member"]),
    (PatternType::AsyncAwait, &["async", "await"]),
    (PatternType::AddImport, &["using", "import", "add reference", "include", "namespace"]),
    (PatternType::Indentation, &["indent", "whitespace", "tab", "tabs"]),
    (PatternType::Rename, &["rename"]),
    (PatternType::TypeConversion, &["cast", "convert", "conversion"]),
    (PatternType::NullSafety, &["null", "nullable"]),
];

const PREFIX_MATCH_MIN_LEN: usize = 4;

fn word_matches(word: &str, keyword: &str) -> bool {
    if keyword.len() >= PREFIX_MATCH_MIN_LEN {
        word.starts_with(keyword)
    } else {
        word == keyword
    }
}

fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let wanted: Vec<&str> = phrase.split_whitespace().collect();
    !wanted.is_empty()
        && words.windows(wanted.len()).any(|window| {
            window
                .iter()
                .zip(&wanted)
                .all(|(word, keyword)| word_matches(word, keyword))
        })
}

impl PatternType {
    /// Derive the tag from a fix description or an error message.
    #[must_use]
    pub fn from_description(text: &str) -> Self {
        let text = text.to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        TYPE_KEYWORDS
            .iter()
            .find(|(_, phrases)| phrases.iter().any(|p| contains_phrase(&words, p)))
            .map_or(Self::General, |(ty, _)| *ty)
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AddImport => "add_import",
            Self::ImplementInterface => "implement_interface",
            Self::AsyncAwait => "async_await",
            Self::Indentation => "indentation",
            Self::Rename => "rename",
            Self::TypeConversion => "type_conversion",
            Self::NullSafety => "null_safety",
            Self::General => "general",
        };
        f.write_str(s)
    }
}

/// A stored fix procedure with its outcome counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Stable identifier.
    pub id: PatternId,
    /// Error class this pattern repairs.
    pub error_class: String,
    /// Coarse repair kind.
    pub pattern_type: PatternType,
    /// The procedure itself.
    pub content: FixContent,
    /// Recorded successes.
    pub success_count: u64,
    /// Recorded failures.
    pub failure_count: u64,
    /// Creation time in milliseconds since epoch.
    pub created_at_ms: u128,
    /// Last recorded use.
    pub last_used_at_ms: u128,
    /// Free-form annotations.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Pattern {
    /// `success / (success + failure)`, 0 when nothing was recorded.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        success_rate(self.success_count, self.failure_count)
    }

    /// Total recorded outcomes.
    #[must_use]
    pub const fn usage(&self) -> u64 {
        self.success_count.saturating_add(self.failure_count)
    }
}

/// Success rate for raw counters.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn success_rate(success: u64, failure: u64) -> f64 {
    let total = success.saturating_add(failure);
    if total == 0 {
        0.0
    } else {
        success as f64 / total as f64
    }
}
