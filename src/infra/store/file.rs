//! File-backed document store.
//!
//! Layout under the root directory, for key `pools/web`:
//!
//! ```text
//! <root>/pools/web.json    document (replaced via write-temp-then-rename)
//! <root>/pools/web.jsonl   append-only log
//! <root>/pools/web.lock    advisory lock file for the critical section
//! ```
//!
//! The critical section is a per-key in-process mutex plus an exclusive
//! `fs2` advisory lock, so independently launched processes sharing the root
//! directory serialize their mutations. Lock attempts are bounded; running
//! out surfaces [`DispatchError::LockContention`].

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use parking_lot::Mutex;

use super::{DocumentStore, Transaction};
use crate::config::StoreConfig;
use crate::core::DispatchError;

const DOC_EXT: &str = "json";
const LOG_EXT: &str = "jsonl";
const LOCK_EXT: &str = "lock";

fn backend(e: impl std::fmt::Display) -> DispatchError {
    DispatchError::Backend(e.to_string())
}

/// Held advisory lock; released on drop.
struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Store persisting documents and logs as files under a root directory.
pub struct FileStore {
    root: PathBuf,
    lock_attempts: u32,
    lock_retry: Duration,
    local: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, cfg: &StoreConfig) -> Result<Self, DispatchError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(backend)?;
        Ok(Self {
            root,
            lock_attempts: cfg.lock_attempts.max(1),
            lock_retry: Duration::from_millis(cfg.lock_retry_ms),
            local: Mutex::new(HashMap::new()),
        })
    }

    /// Root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{key}.{ext}"))
    }

    fn ensure_parent(path: &Path) -> Result<(), DispatchError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(backend)?;
        }
        Ok(())
    }

    fn local_lock(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.local.lock().entry(key.to_string()).or_default())
    }

    fn lock_file(&self, key: &str) -> Result<FileLock, DispatchError> {
        let path = self.path_for(key, LOCK_EXT);
        Self::ensure_parent(&path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(backend)?;

        for attempt in 1..=self.lock_attempts {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(FileLock { file }),
                Err(err) if is_contended(&err) => {
                    tracing::trace!(key, attempt, "store lock busy");
                    std::thread::sleep(self.lock_retry);
                }
                Err(err) => return Err(backend(err)),
            }
        }
        tracing::warn!(key, attempts = self.lock_attempts, "store lock contention");
        Err(DispatchError::LockContention {
            key: key.to_string(),
            attempts: self.lock_attempts,
        })
    }

    fn read_file(path: &Path) -> Result<Option<String>, DispatchError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(backend(err)),
        }
    }

    fn write_atomic(path: &Path, content: &str) -> Result<(), DispatchError> {
        Self::ensure_parent(path)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, content).map_err(backend)?;
        if let Err(err) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(backend(err));
        }
        Ok(())
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl DocumentStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, DispatchError> {
        Self::read_file(&self.path_for(key, DOC_EXT))
    }

    fn transact(&self, key: &str, apply: &mut Transaction<'_>) -> Result<(), DispatchError> {
        let local = self.local_lock(key);
        let _local_guard = local.lock();
        let _file_lock = self.lock_file(key)?;

        let path = self.path_for(key, DOC_EXT);
        let current = Self::read_file(&path)?;
        if let Some(next) = apply(current)? {
            Self::write_atomic(&path, &next)?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, DispatchError> {
        let prefix = prefix.trim_end_matches('/');
        let dir = self.root.join(prefix);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(backend(err)),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(backend)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOC_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(format!("{prefix}/{stem}"));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn append_line(&self, key: &str, line: &str) -> Result<(), DispatchError> {
        let path = self.path_for(key, LOG_EXT);
        Self::ensure_parent(&path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(backend)?;
        writeln!(file, "{line}").map_err(backend)
    }

    fn read_lines(&self, key: &str) -> Result<Vec<String>, DispatchError> {
        let path = self.path_for(key, LOG_EXT);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(backend(err)),
        };
        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(backend)?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    fn rewrite_lines(&self, key: &str, lines: &[String]) -> Result<(), DispatchError> {
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        Self::write_atomic(&self.path_for(key, LOG_EXT), &content)
    }
}
