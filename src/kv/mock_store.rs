//! Mock implementation of KvStore trait for testing

use crate::error::StoreError;
use crate::kv::{KvOp, KvStore, Namespace, UpdateFn};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type Tables = HashMap<Namespace, BTreeMap<String, Vec<u8>>>;

/// In-memory KvStore. A single lock guards every namespace, which makes
/// batches and updates trivially atomic.
#[derive(Clone)]
pub struct MockKvStore {
    data: Arc<Mutex<Tables>>,
}

impl MockKvStore {
    /// Create a new mock key-value store
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Clear all data from the store
    pub fn clear(&self) {
        if let Ok(mut data) = self.data.lock() {
            data.clear();
        }
    }

    /// Number of keys stored in a namespace
    pub fn key_count(&self, ns: Namespace) -> usize {
        self.data
            .lock()
            .map(|data| data.get(&ns).map(|table| table.len()).unwrap_or(0))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.data.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MockKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MockKvStore {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let data = self.lock()?;
        Ok(data.get(&ns).and_then(|table| table.get(key)).cloned())
    }

    fn set(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut data = self.lock()?;
        data.entry(ns).or_default().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &str) -> Result<(), StoreError> {
        let mut data = self.lock()?;
        if let Some(table) = data.get_mut(&ns) {
            table.remove(key);
        }
        Ok(())
    }

    fn batch(&self, ops: Vec<KvOp>) -> Result<(), StoreError> {
        let mut data = self.lock()?;

        // Validate before touching anything so a conflict leaves no partial writes
        for op in &ops {
            if let KvOp::Insert { ns, key, .. } = op {
                if data.get(ns).map(|table| table.contains_key(key)).unwrap_or(false) {
                    return Err(StoreError::Conflict(key.clone()));
                }
            }
        }

        for op in ops {
            match op {
                KvOp::Put { ns, key, value } | KvOp::Insert { ns, key, value } => {
                    data.entry(ns).or_default().insert(key, value);
                }
                KvOp::Delete { ns, key } => {
                    if let Some(table) = data.get_mut(&ns) {
                        table.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn update(&self, ns: Namespace, key: &str, f: &mut UpdateFn<'_>) -> Result<Vec<u8>, StoreError> {
        let mut data = self.lock()?;
        let table = data.entry(ns).or_default();
        let next = f(table.get(key).cloned())?;
        table.insert(key.to_string(), next.clone());
        Ok(next)
    }

    fn scan_keys(&self, ns: Namespace, limit: usize) -> Result<Vec<String>, StoreError> {
        let data = self.lock()?;
        Ok(data
            .get(&ns)
            .map(|table| table.keys().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_kv_store_basic_operations() {
        let store = MockKvStore::new();
        assert_eq!(store.key_count(Namespace::Files), 0);

        store.set(Namespace::Files, "k1", b"v1").unwrap();
        store.set(Namespace::Files, "k2", b"v2").unwrap();
        assert_eq!(store.key_count(Namespace::Files), 2);
        assert_eq!(store.get(Namespace::Files, "k1").unwrap(), Some(b"v1".to_vec()));
        assert!(store.get(Namespace::Quotas, "k1").unwrap().is_none());

        store.delete(Namespace::Files, "k1").unwrap();
        store.delete(Namespace::Files, "missing").unwrap();
        assert_eq!(store.key_count(Namespace::Files), 1);

        store.clear();
        assert_eq!(store.key_count(Namespace::Files), 0);
    }

    #[test]
    fn test_mock_kv_store_scan_is_sorted_and_limited() {
        let store = MockKvStore::new();
        store
            .batch(vec![
                KvOp::put(Namespace::Expiry, "b", Vec::new()),
                KvOp::put(Namespace::Expiry, "c", Vec::new()),
                KvOp::put(Namespace::Expiry, "a", Vec::new()),
            ])
            .unwrap();

        assert_eq!(store.scan_keys(Namespace::Expiry, 10).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.scan_keys(Namespace::Expiry, 1).unwrap(), vec!["a"]);
        assert!(store.scan_keys(Namespace::Files, 10).unwrap().is_empty());
    }

    #[test]
    fn test_mock_kv_store_insert_conflict_aborts_batch() {
        let store = MockKvStore::new();
        store.set(Namespace::Files, "taken", b"original").unwrap();

        let result = store.batch(vec![
            KvOp::put(Namespace::Expiry, "0001/taken", Vec::new()),
            KvOp::insert(Namespace::Files, "taken", b"replacement".to_vec()),
        ]);
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.get(Namespace::Files, "taken").unwrap(), Some(b"original".to_vec()));
        assert_eq!(store.key_count(Namespace::Expiry), 0);
    }

    #[test]
    fn test_mock_kv_store_update_error_leaves_value() {
        let store = MockKvStore::new();
        store.set(Namespace::Stats, "current", b"old").unwrap();

        let result = store.update(Namespace::Stats, "current", &mut |_| Err(StoreError::Poisoned));
        assert!(result.is_err());
        assert_eq!(store.get(Namespace::Stats, "current").unwrap(), Some(b"old".to_vec()));
    }
}
