//! Blob Store
//!
//! Persists ciphertext together with its metadata as one `BlobRecord` under
//! the `files` namespace. Blobs are content-addressed: the key is the
//! lowercase hex SHA-256 of the stored bytes. Each record carries its own
//! expiry deadline and a matching entry in the `expiry` index, written in the
//! same atomic batch, so a blob can never exist without its deadline.

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{RelayError, StoreError};
use crate::kv::{read_record, KvOp, KvStore, Namespace};

/// Length of a blob key in hex characters
pub const KEY_LEN: usize = 64;

/// File suffix the upload helper appends to keys
pub const ENCRYPTED_SUFFIX: &str = ".enc";

/// One stored object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlobRecord {
    pub key: String,
    pub content: Vec<u8>,
    /// Always `content.len()`
    pub size: u64,
    pub created: DateTime<Utc>,
    /// Secret the uploader must present to delete early
    pub deletion_key: String,
    pub expires_at: DateTime<Utc>,
}

impl BlobRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Normalize and validate a blob key taken from a request path.
/// Accepts an optional `.enc` suffix and upper-case hex.
pub fn validate_key(raw: &str) -> Result<String, RelayError> {
    let key = raw.strip_suffix(ENCRYPTED_SUFFIX).unwrap_or(raw);
    if key.len() != KEY_LEN || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RelayError::validation(format!(
            "Invalid key: expected {} hex characters",
            KEY_LEN
        )));
    }
    Ok(key.to_ascii_lowercase())
}

/// Lowercase hex SHA-256 of `content`
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Expiry index key. Zero-padded millis make lexical order match time order.
fn expiry_index_key(expires_at: DateTime<Utc>, key: &str) -> String {
    format!("{:020}/{}", expires_at.timestamp_millis().max(0), key)
}

fn parse_expiry_index_key(index_key: &str) -> Option<(DateTime<Utc>, &str)> {
    let (millis, key) = index_key.split_once('/')?;
    let millis: i64 = millis.parse().ok()?;
    let deadline = Utc.timestamp_millis_opt(millis).single()?;
    Some((deadline, key))
}

pub struct BlobStore {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl BlobStore {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store a new blob. Fails with `StoreError::Conflict` if the key is taken;
    /// existing blobs are never overwritten.
    pub fn put(&self, key: &str, content: Vec<u8>, deletion_key: &str) -> Result<BlobRecord, StoreError> {
        let created = self.clock.now();
        let expires_at = created
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let record = BlobRecord {
            key: key.to_string(),
            size: content.len() as u64,
            content,
            created,
            deletion_key: deletion_key.to_string(),
            expires_at,
        };

        let encoded = bincode::serialize(&record)?;
        self.store.batch(vec![
            KvOp::insert(Namespace::Files, key, encoded),
            KvOp::put(Namespace::Expiry, expiry_index_key(expires_at, key), Vec::new()),
        ])?;

        info!("Stored blob {} ({} bytes), expires at {}", key, record.size, expires_at);
        Ok(record)
    }

    pub fn get(&self, key: &str) -> Result<Option<BlobRecord>, StoreError> {
        read_record(self.store.as_ref(), Namespace::Files, key)
    }

    /// Remove a blob and its expiry entry. Absent keys are a no-op so that
    /// expiry and explicit deletion can race harmlessly.
    pub fn delete(&self, key: &str) -> Result<Option<BlobRecord>, StoreError> {
        let record = match self.get(key)? {
            Some(record) => record,
            None => {
                debug!("Delete of absent blob {} ignored", key);
                return Ok(None);
            }
        };

        self.store.batch(vec![
            KvOp::delete(Namespace::Files, key),
            KvOp::delete(Namespace::Expiry, expiry_index_key(record.expires_at, key)),
        ])?;

        info!("Removed blob {} ({} bytes)", key, record.size);
        Ok(Some(record))
    }

    /// Keys whose deadline is at or before `now`, oldest first
    pub fn expired_keys(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>, StoreError> {
        Ok(self
            .expired_entries(now, limit)?
            .into_iter()
            .map(|(_, key)| key)
            .collect())
    }

    /// Due expiry index entries as `(deadline, key)`, oldest first
    pub fn expired_entries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<(DateTime<Utc>, String)>, StoreError> {
        let index = self.store.scan_keys(Namespace::Expiry, limit)?;
        let mut expired = Vec::new();
        for entry in &index {
            match parse_expiry_index_key(entry) {
                Some((deadline, key)) if deadline <= now => expired.push((deadline, key.to_string())),
                Some(_) => break,
                None => {
                    warn!("Dropping malformed expiry index entry {}", entry);
                    self.store.delete(Namespace::Expiry, entry)?;
                }
            }
        }
        Ok(expired)
    }

    /// Remove one expiry index entry, leaving any record alone
    pub fn drop_index_entry(&self, expires_at: DateTime<Utc>, key: &str) -> Result<(), StoreError> {
        self.store.delete(Namespace::Expiry, &expiry_index_key(expires_at, key))
    }

    /// Remove a record without reading it, together with its index entry.
    /// Used for records that no longer decode.
    pub fn discard(&self, expires_at: DateTime<Utc>, key: &str) -> Result<(), StoreError> {
        self.store.batch(vec![
            KvOp::delete(Namespace::Files, key),
            KvOp::delete(Namespace::Expiry, expiry_index_key(expires_at, key)),
        ])?;
        warn!("Discarded blob {}", key);
        Ok(())
    }
}
