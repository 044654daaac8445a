//! AttemptLedger — which (submitter, version) pairs have been graded.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::ATTEMPTS;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, BTreeSet<u64>>,
    /// Submitters whose sets have changed since the last flush.
    dirty: HashSet<String>,
}

/// Durable, append-only mapping from submitter to graded versions.
///
/// Reads and writes go through an in-memory cache; `flush` persists
/// dirty entries to redb. Writes from concurrent grader tasks are
/// serialized by the internal mutex.
#[derive(Clone)]
pub struct AttemptLedger {
    db: Arc<Database>,
    inner: Arc<Mutex<Inner>>,
}

impl AttemptLedger {
    /// Open (or create) a persistent ledger at the given path and load
    /// every recorded entry into memory.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let ledger = Self {
            db: Arc::new(db),
            inner: Arc::new(Mutex::new(Inner::default())),
        };
        ledger.ensure_table()?;
        ledger.load()?;
        debug!(?path, "attempt ledger opened");
        Ok(ledger)
    }

    /// Create an ephemeral in-memory ledger (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let ledger = Self {
            db: Arc::new(db),
            inner: Arc::new(Mutex::new(Inner::default())),
        };
        ledger.ensure_table()?;
        Ok(ledger)
    }

    fn ensure_table(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn load(&self) -> StateResult<()> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
        let mut inner = self.inner.lock().expect("ledger mutex poisoned");
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let versions: BTreeSet<u64> =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            inner.entries.insert(key.value().to_string(), versions);
        }
        debug!(submitters = inner.entries.len(), "ledger loaded");
        Ok(())
    }

    /// Record a graded version. Append-only and idempotent; returns
    /// true if the version was newly recorded.
    pub fn record_graded(&self, submitter: &str, version: u64) -> bool {
        let mut inner = self.inner.lock().expect("ledger mutex poisoned");
        let added = inner
            .entries
            .entry(submitter.to_string())
            .or_default()
            .insert(version);
        if added {
            inner.dirty.insert(submitter.to_string());
            debug!(%submitter, version, "graded version recorded");
        }
        added
    }

    /// The set of graded versions for a submitter; absent means empty.
    pub fn graded_versions(&self, submitter: &str) -> BTreeSet<u64> {
        let inner = self.inner.lock().expect("ledger mutex poisoned");
        inner.entries.get(submitter).cloned().unwrap_or_default()
    }

    /// Whether a specific version has already been graded.
    pub fn is_graded(&self, submitter: &str, version: u64) -> bool {
        let inner = self.inner.lock().expect("ledger mutex poisoned");
        inner
            .entries
            .get(submitter)
            .is_some_and(|set| set.contains(&version))
    }

    /// Completed grading runs for a submitter, the raw fairness signal.
    pub fn attempts(&self, submitter: &str) -> u32 {
        let inner = self.inner.lock().expect("ledger mutex poisoned");
        inner.entries.get(submitter).map_or(0, |set| set.len() as u32)
    }

    /// Persist every dirty entry. Called after each scheduling cycle
    /// and once more on shutdown.
    ///
    /// The dirty set is drained while the serialization snapshot is
    /// taken, so a `record_graded` landing during the commit re-marks
    /// its submitter dirty and is picked up by the next flush instead
    /// of being dropped. On write failure the drained names go back
    /// into the dirty set.
    pub fn flush(&self) -> StateResult<()> {
        let (names, to_write) = {
            let mut inner = self.inner.lock().expect("ledger mutex poisoned");
            if inner.dirty.is_empty() {
                return Ok(());
            }
            let names: Vec<String> = inner.dirty.drain().collect();
            let mut to_write = Vec::with_capacity(names.len());
            for name in &names {
                let set = inner.entries.get(name).cloned().unwrap_or_default();
                match serde_json::to_vec(&set) {
                    Ok(bytes) => to_write.push((name.clone(), bytes)),
                    Err(e) => {
                        inner.dirty.extend(names.iter().cloned());
                        return Err(StateError::Serialize(e.to_string()));
                    }
                }
            }
            (names, to_write)
        };

        if let Err(e) = self.write_batch(&to_write) {
            let mut inner = self.inner.lock().expect("ledger mutex poisoned");
            inner.dirty.extend(names);
            return Err(e);
        }
        debug!(flushed = to_write.len(), "ledger flushed");
        Ok(())
    }

    fn write_batch(&self, to_write: &[(String, Vec<u8>)]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ATTEMPTS).map_err(map_err!(Table))?;
            for (name, bytes) in to_write {
                table
                    .insert(name.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}
