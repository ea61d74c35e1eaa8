//! In-memory document store for development, tests and single-process use.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{DocumentStore, Transaction};
use crate::core::DispatchError;

/// Simple in-memory store. One mutex guards all documents, so transactions
/// on different keys serialize; logs use a separate mutex.
#[derive(Default)]
pub struct InMemoryStore {
    docs: Mutex<HashMap<String, String>>,
    logs: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, DispatchError> {
        Ok(self.docs.lock().get(key).cloned())
    }

    fn transact(&self, key: &str, apply: &mut Transaction<'_>) -> Result<(), DispatchError> {
        let mut docs = self.docs.lock();
        let current = docs.get(key).cloned();
        if let Some(next) = apply(current)? {
            docs.insert(key.to_string(), next);
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, DispatchError> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let mut keys: Vec<String> = self
            .docs
            .lock()
            .keys()
            .filter(|k| k.strip_prefix(&dir).is_some_and(|rest| !rest.contains('/')))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn append_line(&self, key: &str, line: &str) -> Result<(), DispatchError> {
        self.logs
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(line.to_string());
        Ok(())
    }

    fn read_lines(&self, key: &str) -> Result<Vec<String>, DispatchError> {
        Ok(self.logs.lock().get(key).cloned().unwrap_or_default())
    }

    fn rewrite_lines(&self, key: &str, lines: &[String]) -> Result<(), DispatchError> {
        self.logs.lock().insert(key.to_string(), lines.to_vec());
        Ok(())
    }
}
