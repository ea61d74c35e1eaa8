//! Transactional document stores backing the pool registry, the pattern
//! ledger and plan documents.
//!
//! A store holds two kinds of objects addressed by slash-separated keys
//! (`pools/web`, `ledger/index`):
//!
//! - **documents**: whole JSON values replaced atomically inside
//!   [`DocumentStore::transact`], the only mutation path;
//! - **logs**: append-only JSON-lines streams.
//!
//! Plain [`DocumentStore::read`] calls take no lock and are meant for
//! reporting (dirty reads).

pub mod file;
pub mod memory;

use serde::{de::DeserializeOwned, Serialize};

use crate::core::DispatchError;

pub use file::FileStore;
pub use memory::InMemoryStore;

/// Callback applied to a document inside the store's critical section.
///
/// Receives the current raw document (if any) and returns the replacement,
/// or `None` to leave the document untouched.
pub type Transaction<'a> =
    dyn FnMut(Option<String>) -> Result<Option<String>, DispatchError> + 'a;

/// Abstraction for document/log storage backends.
pub trait DocumentStore: Send + Sync {
    /// Read a document without taking the critical section.
    fn read(&self, key: &str) -> Result<Option<String>, DispatchError>;

    /// Run `apply` against the current document while holding the exclusive
    /// critical section for `key`, persisting its result atomically.
    fn transact(&self, key: &str, apply: &mut Transaction<'_>) -> Result<(), DispatchError>;

    /// List document keys directly under `prefix` (e.g. `pools`).
    fn list(&self, prefix: &str) -> Result<Vec<String>, DispatchError>;

    /// Append a line to the log stored under `key`.
    fn append_line(&self, key: &str, line: &str) -> Result<(), DispatchError>;

    /// Read all lines of the log stored under `key` (empty if absent).
    fn read_lines(&self, key: &str) -> Result<Vec<String>, DispatchError>;

    /// Replace the log stored under `key` with `lines`.
    fn rewrite_lines(&self, key: &str, lines: &[String]) -> Result<(), DispatchError>;
}

/// Check that `segment` can be used as one component of a store key.
///
/// Allowed: ASCII alphanumerics, `-`, `_` and `.`, not starting with `.`.
pub fn validate_key_segment(segment: &str) -> Result<(), String> {
    if segment.is_empty() {
        return Err("name must not be empty".into());
    }
    if segment.starts_with('.') {
        return Err(format!("name `{segment}` must not start with '.'"));
    }
    if let Some(bad) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("name `{segment}` contains invalid character {bad:?}"));
    }
    Ok(())
}

/// Read and decode a JSON document.
pub fn read_json<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    key: &str,
) -> Result<Option<T>, DispatchError> {
    store
        .read(key)?
        .map(|raw| decode(key, &raw))
        .transpose()
}

/// Decode-modify-encode a JSON document inside the store's critical section.
///
/// `f` receives the current document and returns the replacement (or `None`
/// to skip the write) together with a value handed back to the caller. An
/// error from `f` aborts the transaction without writing.
pub fn update_json<T, R, F>(store: &dyn DocumentStore, key: &str, f: F) -> Result<R, DispatchError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(Option<T>) -> Result<(Option<T>, R), DispatchError>,
{
    let mut f = Some(f);
    let mut out = None;
    store.transact(key, &mut |raw| {
        let f = f
            .take()
            .ok_or_else(|| DispatchError::Backend(format!("transaction on `{key}` re-entered")))?;
        let current = raw.map(|raw| decode::<T>(key, &raw)).transpose()?;
        let (next, result) = f(current)?;
        out = Some(result);
        next.map(|doc| encode(key, &doc)).transpose()
    })?;
    out.ok_or_else(|| DispatchError::Backend(format!("transaction on `{key}` produced no result")))
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, DispatchError> {
    serde_json::from_str(raw)
        .map_err(|e| DispatchError::Backend(format!("corrupt document `{key}`: {e}")))
}

fn encode<T: Serialize>(key: &str, doc: &T) -> Result<String, DispatchError> {
    serde_json::to_string_pretty(doc)
        .map_err(|e| DispatchError::Backend(format!("cannot encode `{key}`: {e}")))
}
