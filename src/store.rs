use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::card::CardRecord;

#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store at {path} could not be encoded: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store at {path} unreadable after {attempts} attempts")]
    Contended { path: PathBuf, attempts: usize },
}

/// How hard to try reading a file another writer may be replacing.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// The card collection as one pretty-printed JSON array, rewritten wholesale.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    policy: RetryPolicy,
    #[cfg(test)]
    failing_reads: AtomicUsize,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_policy(path, RetryPolicy::default())
    }

    pub fn with_policy(path: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            #[cfg(test)]
            failing_reads: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the collection, retrying on unreadable content. A missing file is
    /// an empty collection; exhausted retries are `StoreError::Contended`.
    pub fn try_load(&self) -> Result<Vec<CardRecord>, StoreError> {
        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            match self.read_once() {
                Ok(records) => return Ok(records),
                Err(err) => {
                    debug!("read attempt {attempt}/{attempts} failed: {err}");
                    if attempt < attempts {
                        thread::sleep(self.policy.delay);
                    }
                }
            }
        }
        Err(StoreError::Contended {
            path: self.path.clone(),
            attempts,
        })
    }

    /// Replaces the whole collection without ever exposing a half-written file.
    pub fn save(&self, records: &[CardRecord]) -> Result<(), StoreError> {
        let mut contents =
            serde_json::to_string_pretty(records).map_err(|source| StoreError::Json {
                path: self.path.clone(),
                source,
            })?;
        contents.push('\n');
        write_atomic(&self.path, contents.as_bytes())
    }

    /// Re-reads, appends and rewrites. Nothing is written when the current
    /// contents could not be confirmed.
    pub fn append(&self, records: &[CardRecord]) -> Result<usize, StoreError> {
        let mut current = self.try_load()?;
        current.extend_from_slice(records);
        self.save(&current)?;
        Ok(current.len())
    }

    /// Deletes the store file. Returns whether there was one.
    pub fn clear(&self) -> Result<bool, StoreError> {
        remove_if_exists(&self.path)
    }

    fn read_once(&self) -> Result<Vec<CardRecord>, StoreError> {
        #[cfg(test)]
        {
            let pending = self.failing_reads.load(Ordering::SeqCst);
            if pending > 0 {
                self.failing_reads.store(pending - 1, Ordering::SeqCst);
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source: io::Error::other("induced read failure"),
                });
            }
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
impl RecordStore {
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }
}

/// Writes to a temp file in the same directory, then renames it over `path`,
/// so readers see either the old contents or the new ones.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let io_err = |source: io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.write_all(contents).map_err(io_err)?;
    temp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Holds records until an append succeeds, so a failed save is retried on
/// the next flush instead of being dropped.
#[derive(Debug)]
pub struct BufferedWriter<'a> {
    store: &'a RecordStore,
    pending: Vec<CardRecord>,
}

impl<'a> BufferedWriter<'a> {
    pub fn new(store: &'a RecordStore) -> Self {
        Self {
            store,
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, record: CardRecord) {
        self.pending.push(record);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns the stored record count, or `None` when nothing was pending.
    pub fn flush(&mut self) -> Result<Option<usize>, StoreError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let total = self.store.append(&self.pending)?;
        self.pending.clear();
        Ok(Some(total))
    }
}
