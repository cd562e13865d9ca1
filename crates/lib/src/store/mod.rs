//! The transactional key-value store backing the account manager.
//!
//! An ordered in-memory map with optional per-record TTL and JSON file
//! persistence. The store is the authoritative source of truth for all
//! account state; the in-memory indexes in [`accounts`](crate::accounts)
//! are caches rebuilt from it.
//!
//! Access goes through closure-scoped transactions:
//!
//! * [`Store::view`] runs a read-only closure under the shared lock and
//!   sees a consistent snapshot.
//! * [`Store::update`] runs a read-write closure under the exclusive lock.
//!   When the closure returns an error, every write it performed is rolled
//!   back, so no partial transaction is ever visible.
//!
//! Records past their TTL deadline are invisible to reads and are
//! physically purged at the start of the next `update`. Writing a record
//! without a TTL clears any deadline a previous write installed; the
//! verification path relies on this to promote provisional records to
//! permanent ones.

use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub mod keys;

/// Error types for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if this error indicates a key was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// A stored value with an optional expiry deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<SystemTime>,
}

impl Record {
    fn live(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

/// An ordered, transactional key-value store with per-record TTL.
///
/// Provides basic persistence via [`save_to_file`](Store::save_to_file)
/// and [`load_from_file`](Store::load_from_file), serializing the record
/// map to JSON. Suitable for a single-process server; the exclusive lock
/// held for the whole of an `update` closure is what makes transactions
/// serializable.
#[derive(Debug, Default)]
pub struct Store {
    records: RwLock<BTreeMap<String, Record>>,
}

/// Serializable mirror of [`Store`] for persistence.
#[derive(Serialize, Deserialize)]
struct SerializableStore {
    records: BTreeMap<String, Record>,
}

impl Serialize for Store {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let records = self.records.read().unwrap().clone();
        SerializableStore { records }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Store {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let serializable = SerializableStore::deserialize(deserializer)?;
        Ok(Store {
            records: RwLock::new(serializable.records),
        })
    }
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a JSON snapshot file. A missing file yields an
    /// empty store so first startup needs no special casing.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let store = serde_json::from_str(&content)?;
        Ok(store)
    }

    /// Write a JSON snapshot of the store to a file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let json = serde_json::to_string(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Run a read-only transaction. The closure sees a consistent snapshot
    /// of the store for its whole duration.
    pub fn view<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&ReadTx<'_>) -> Result<T, E>,
    {
        let guard = self.records.read().unwrap();
        let tx = ReadTx {
            records: &*guard,
            now: SystemTime::now(),
        };
        f(&tx)
    }

    /// Run a read-write transaction. When the closure returns an error,
    /// every write it performed is rolled back and the error is returned;
    /// the error type only has to be convertible from [`StoreError`], so
    /// callers can fail a transaction with their own domain errors.
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut WriteTx<'_>) -> Result<T, E>,
    {
        let mut guard = self.records.write().unwrap();
        let now = SystemTime::now();
        guard.retain(|_, record| record.live(now));

        let mut tx = WriteTx {
            records: &mut *guard,
            undo: Vec::new(),
            now,
        };
        match f(&mut tx) {
            Ok(value) => Ok(value),
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }
}

fn get_live<'a>(
    records: &'a BTreeMap<String, Record>,
    now: SystemTime,
    key: &str,
) -> Option<&'a Record> {
    records.get(key).filter(|record| record.live(now))
}

fn ascend_from<F>(records: &BTreeMap<String, Record>, now: SystemTime, start: &str, mut visitor: F)
where
    F: FnMut(&str, &str) -> bool,
{
    let range = records.range::<str, _>((Bound::Included(start), Bound::Unbounded));
    for (key, record) in range {
        if !record.live(now) {
            continue;
        }
        if !visitor(key, &record.value) {
            break;
        }
    }
}

/// Read operations shared by both transaction handles, so loaders can run
/// inside either a `view` or an `update`.
pub trait Transaction {
    /// Get the value stored under `key`.
    fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Whether a live record exists under `key`.
    fn contains(&self, key: &str) -> bool;

    /// Whether the record under `key` carries an expiry deadline.
    fn has_ttl(&self, key: &str) -> bool;
}

impl Transaction for ReadTx<'_> {
    fn get(&self, key: &str) -> Result<String, StoreError> {
        ReadTx::get(self, key)
    }

    fn contains(&self, key: &str) -> bool {
        ReadTx::contains(self, key)
    }

    fn has_ttl(&self, key: &str) -> bool {
        ReadTx::has_ttl(self, key)
    }
}

impl Transaction for WriteTx<'_> {
    fn get(&self, key: &str) -> Result<String, StoreError> {
        WriteTx::get(self, key)
    }

    fn contains(&self, key: &str) -> bool {
        WriteTx::contains(self, key)
    }

    fn has_ttl(&self, key: &str) -> bool {
        WriteTx::has_ttl(self, key)
    }
}

/// A read-only transaction handle.
pub struct ReadTx<'a> {
    records: &'a BTreeMap<String, Record>,
    now: SystemTime,
}

impl ReadTx<'_> {
    /// Get the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        get_live(self.records, self.now, key)
            .map(|record| record.value.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    /// Whether a live record exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        get_live(self.records, self.now, key).is_some()
    }

    /// Whether the record under `key` carries an expiry deadline.
    pub fn has_ttl(&self, key: &str) -> bool {
        get_live(self.records, self.now, key)
            .map(|record| record.expires_at.is_some())
            .unwrap_or(false)
    }

    /// Visit keys in ascending order starting at `start` (inclusive). The
    /// visitor returns `false` to stop the scan.
    pub fn ascend_from<F>(&self, start: &str, visitor: F)
    where
        F: FnMut(&str, &str) -> bool,
    {
        ascend_from(self.records, self.now, start, visitor)
    }
}

/// A read-write transaction handle with an undo journal.
pub struct WriteTx<'a> {
    records: &'a mut BTreeMap<String, Record>,
    undo: Vec<(String, Option<Record>)>,
    now: SystemTime,
}

impl WriteTx<'_> {
    /// Get the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        get_live(self.records, self.now, key)
            .map(|record| record.value.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    /// Whether a live record exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        get_live(self.records, self.now, key).is_some()
    }

    /// Whether the record under `key` carries an expiry deadline.
    pub fn has_ttl(&self, key: &str) -> bool {
        get_live(self.records, self.now, key)
            .map(|record| record.expires_at.is_some())
            .unwrap_or(false)
    }

    /// Set `key` to `value`. With a `ttl` the record expires that long
    /// after now; without one any previous deadline is cleared.
    pub fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let previous = self.records.get(key).cloned();
        self.undo.push((key.to_string(), previous));
        self.records.insert(
            key.to_string(),
            Record {
                value: value.to_string(),
                expires_at: ttl.map(|d| self.now + d),
            },
        );
        Ok(())
    }

    /// Delete the record under `key`. Deleting an absent key is a no-op.
    pub fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        let previous = self.records.remove(key);
        self.undo.push((key.to_string(), previous));
        Ok(())
    }

    /// Restore every touched key to its pre-transaction state. Entries
    /// replay newest-first so a key touched twice ends at its original
    /// value.
    fn rollback(&mut self) {
        while let Some((key, previous)) = self.undo.pop() {
            match previous {
                Some(record) => {
                    self.records.insert(key, record);
                }
                None => {
                    self.records.remove(&key);
                }
            }
        }
    }
}
