/// Missing-set computation and the shared store that carries it back to the sender.
///
/// ```text
/// [Receiver] --atomic replace--> missing_frames.json <--poll-- [Sender]
/// ```
///
/// The receiver is the only writer and always replaces the whole file, so a
/// reader sees either the previous list or the new one. Readers treat an
/// absent or unparsable file as "no update" and keep what they had.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;

use crate::aggregator::ReceiveAggregator;
use crate::error::TransferError;

/// Default number of newly held frames between store writes.
pub const DEFAULT_PERSIST_EVERY: u32 = 10;

/// Frame ids in `1..=total` not held by the aggregator, ascending, no
/// duplicates. Empty while the total is unknown.
pub fn compute_missing(aggregator: &ReceiveAggregator) -> Vec<u32> {
    aggregator.missing_frames()
}

/// Sort and deduplicate a list read from an untrusted store.
pub fn normalize(mut ids: Vec<u32>) -> Vec<u32> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Shared artifact holding an ordered list of missing frame ids.
pub trait MissingStore {
    /// Read the list. `Ok(None)` when the artifact does not exist.
    fn load(&self) -> Result<Option<Vec<u32>>, TransferError>;

    /// Replace the list atomically.
    fn store(&self, ids: &[u32]) -> Result<(), TransferError>;
}

/// JSON array of integers in a file, replaced via temp file + rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MissingStore for JsonFileStore {
    fn load(&self) -> Result<Option<Vec<u32>>, TransferError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TransferError::StoreUnreadable(e.to_string())),
        };
        let ids: Vec<u32> = serde_json::from_slice(&raw)
            .map_err(|e| TransferError::StoreUnreadable(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(normalize(ids)))
    }

    fn store(&self, ids: &[u32]) -> Result<(), TransferError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(ids)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// In-process store. Clones share the same list; used to wire a sender and
/// receiver together without a filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Option<Vec<u32>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MissingStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<u32>>, TransferError> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }

    fn store(&self, ids: &[u32]) -> Result<(), TransferError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(ids.to_vec());
        Ok(())
    }
}

/// Receiver side: decides when the missing set is due and writes it.
#[derive(Debug)]
pub struct MissingSetTracker<S> {
    store: S,
    persist_every: u32,
    /// `received_count` at the last successful write.
    persisted_at: Option<u32>,
}

impl<S: MissingStore> MissingSetTracker<S> {
    pub fn new(store: S, persist_every: u32) -> Self {
        Self {
            store,
            persist_every: persist_every.max(1),
            persisted_at: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write the missing set if a write is due: first time the total is known,
    /// every `persist_every` newly held frames, or on reaching the total.
    /// Returns the number of missing ids written, or `None` if nothing was due.
    /// A failed write leaves the tracker due, so the next call retries.
    pub fn maybe_persist(
        &mut self,
        aggregator: &ReceiveAggregator,
    ) -> Result<Option<usize>, TransferError> {
        let Some(total) = aggregator.total_frames() else {
            return Ok(None);
        };
        let received = aggregator.received_count();
        let due = match self.persisted_at {
            None => true,
            Some(at) => {
                received != at && (received - at >= self.persist_every || received == total)
            }
        };
        if !due {
            return Ok(None);
        }
        self.persist(aggregator).map(Some)
    }

    /// Write the missing set now. Returns the number of missing ids written.
    pub fn persist(&mut self, aggregator: &ReceiveAggregator) -> Result<usize, TransferError> {
        if aggregator.total_frames().is_none() {
            return Ok(0);
        }
        let missing = compute_missing(aggregator);
        self.store.store(&missing)?;
        self.persisted_at = Some(aggregator.received_count());
        Ok(missing.len())
    }
}

/// Result of one sender-side poll of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedUpdate {
    Loaded,
    Absent,
    Unreadable(String),
}

/// Sender side: the last missing set successfully read from the store.
#[derive(Debug)]
pub struct MissingSetFeed<S> {
    store: S,
    current: Vec<u32>,
}

impl<S: MissingStore> MissingSetFeed<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            current: Vec::new(),
        }
    }

    /// Re-read the store. On absence or a parse failure the previous set is
    /// kept; before any successful read that set is empty.
    pub fn poll(&mut self) -> FeedUpdate {
        match self.store.load() {
            Ok(Some(ids)) => {
                self.current = normalize(ids);
                FeedUpdate::Loaded
            }
            Ok(None) => FeedUpdate::Absent,
            Err(e) => FeedUpdate::Unreadable(e.to_string()),
        }
    }

    pub fn current(&self) -> &[u32] {
        &self.current
    }
}
