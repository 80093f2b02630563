//! Key-Value Store Abstraction
//!
//! All relay state (blob records, the expiry index, the quota and stats
//! singletons) lives behind this trait so the services can run against
//! SQLite in production and an in-memory map in tests.

pub mod sqlite_store;
pub mod mock_store;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// Logical namespaces of the persisted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Blob records keyed by blob key
    Files,
    /// Expiry index keyed by `{expires_at_millis:020}/{blob key}`
    Expiry,
    /// Quota singleton
    Quotas,
    /// Usage statistics singleton
    Stats,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Files => "files",
            Namespace::Expiry => "expiry",
            Namespace::Quotas => "quotas",
            Namespace::Stats => "stats",
        }
    }
}

/// Key used for the singleton records in `Quotas` and `Stats`
pub const SINGLETON_KEY: &str = "current";

/// A single write inside an atomic batch
#[derive(Debug, Clone)]
pub enum KvOp {
    Put { ns: Namespace, key: String, value: Vec<u8> },
    /// Like `Put`, but the whole batch fails with `StoreError::Conflict`
    /// if the key is already present
    Insert { ns: Namespace, key: String, value: Vec<u8> },
    Delete { ns: Namespace, key: String },
}

impl KvOp {
    pub fn put(ns: Namespace, key: impl Into<String>, value: Vec<u8>) -> Self {
        KvOp::Put { ns, key: key.into(), value }
    }

    pub fn insert(ns: Namespace, key: impl Into<String>, value: Vec<u8>) -> Self {
        KvOp::Insert { ns, key: key.into(), value }
    }

    pub fn delete(ns: Namespace, key: impl Into<String>) -> Self {
        KvOp::Delete { ns, key: key.into() }
    }
}

/// Closure applied by [`KvStore::update`]: receives the current value (if any)
/// and returns the value to store.
pub type UpdateFn<'a> = dyn FnMut(Option<Vec<u8>>) -> Result<Vec<u8>, StoreError> + 'a;

/// Trait defining the key-value storage interface
pub trait KvStore: Send + Sync {
    /// Read a value
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value, replacing any previous one
    fn set(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a value. Removing an absent key is not an error.
    fn delete(&self, ns: Namespace, key: &str) -> Result<(), StoreError>;

    /// Apply all operations or none of them
    fn batch(&self, ops: Vec<KvOp>) -> Result<(), StoreError>;

    /// Atomic read-modify-write of a single key. Returns the stored value.
    fn update(&self, ns: Namespace, key: &str, f: &mut UpdateFn<'_>) -> Result<Vec<u8>, StoreError>;

    /// Keys of a namespace in ascending order, at most `limit` of them
    fn scan_keys(&self, ns: Namespace, limit: usize) -> Result<Vec<String>, StoreError>;
}

/// Decode a bincode record, `None` if the key is absent
pub fn read_record<T: DeserializeOwned>(
    store: &dyn KvStore,
    ns: Namespace,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(ns, key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

/// Atomically mutate a bincode record, starting from `init()` when absent.
/// Returns the record as stored.
pub fn update_record<T, I, F>(
    store: &dyn KvStore,
    ns: Namespace,
    key: &str,
    init: I,
    mut mutate: F,
) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned,
    I: Fn() -> T,
    F: FnMut(&mut T),
{
    let stored = store.update(ns, key, &mut |current| {
        let mut record = match current {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => init(),
        };
        mutate(&mut record);
        Ok(bincode::serialize(&record)?)
    })?;
    Ok(bincode::deserialize(&stored)?)
}
