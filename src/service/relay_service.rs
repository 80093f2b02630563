//! Relay service: sequences the blob store, quota ledger and statistics
//! recorder for every upload, download, deletion and expiry.
//!
//! Upload order: persist blob (with its expiry deadline) -> quotas -> stats.
//! Removal order: fetch record -> stats -> quotas -> remove blob.

use chrono::Duration;
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use subtle::ConstantTimeEq;

use crate::blob::{content_hash, validate_key, BlobRecord, BlobStore};
use crate::clock::Clock;
use crate::error::{RelayError, StoreError};
use crate::kv::KvStore;
use crate::quota::{QuotaLedger, QuotaLimits, QuotaState};
use crate::stats::{StatsRecorder, StatsState};

pub struct RelayService {
    blobs: BlobStore,
    quotas: QuotaLedger,
    stats: StatsRecorder,
    clock: Arc<dyn Clock>,
    // Serializes removals so a concurrent delete and expiry of the same blob
    // cannot both adjust the counters
    removal_lock: Mutex<()>,
}

impl RelayService {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, limits: QuotaLimits, ttl: Duration) -> Self {
        Self {
            blobs: BlobStore::new(store.clone(), clock.clone(), ttl),
            quotas: QuotaLedger::new(store.clone(), clock.clone(), limits),
            stats: StatsRecorder::new(store, clock.clone()),
            clock,
            removal_lock: Mutex::new(()),
        }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn quota_ledger(&self) -> &QuotaLedger {
        &self.quotas
    }

    /// Accept a new blob. `raw_key` must be the SHA-256 of `content`.
    pub fn upload(&self, raw_key: &str, content: Vec<u8>, deletion_key: &str) -> Result<BlobRecord, RelayError> {
        let key = validate_key(raw_key)?;
        if deletion_key.is_empty() {
            return Err(RelayError::validation("Deletion key required"));
        }
        if content.is_empty() {
            return Err(RelayError::validation("No data was uploaded"));
        }

        let actual = content_hash(&content);
        if actual != key {
            warn!("Content hash mismatch for {}: body hashes to {}", key, actual);
            return Err(RelayError::validation("Key does not match the SHA-256 of the uploaded data"));
        }

        let size = content.len() as u64;
        if !self.quotas.check_quota(size)? {
            return Err(RelayError::QuotaExceeded);
        }

        let record = self.blobs.put(&key, content, deletion_key).map_err(|e| match e {
            StoreError::Conflict(_) => {
                warn!("Rejecting upload of existing blob {}", key);
                RelayError::AlreadyExists
            }
            other => RelayError::Store(other),
        })?;

        self.quotas.update_quotas(record.size, true)?;
        self.stats.record_upload(record.size)?;
        info!("Upload of {} complete, expiry armed for {}", key, record.expires_at);
        Ok(record)
    }

    /// Fetch a blob for download. Expired blobs are removed on access.
    pub fn download(&self, raw_key: &str) -> Result<BlobRecord, RelayError> {
        let key = validate_key(raw_key)?;
        let record = self.blobs.get(&key)?.ok_or(RelayError::NotFound)?;

        if record.is_expired(self.clock.now()) {
            debug!("Blob {} requested after its deadline", key);
            if let Err(e) = self.expire(&key) {
                error!("Failed to expire blob {} on access: {}", key, e);
            }
            return Err(RelayError::NotFound);
        }

        self.stats.record_download(record.size)?;
        Ok(record)
    }

    /// Delete a blob early, authorized by the uploader's deletion key
    pub fn delete(&self, raw_key: &str, secret: &str) -> Result<(), RelayError> {
        let key = validate_key(raw_key)?;
        let _guard = self.lock_removals()?;

        let record = self.blobs.get(&key)?.ok_or(RelayError::NotFound)?;
        if !secrets_match(&record.deletion_key, secret) {
            warn!("Rejected deletion of {}: deletion key mismatch", key);
            return Err(RelayError::Forbidden);
        }

        self.remove(&record)?;
        info!("Blob {} deleted by uploader", key);
        Ok(())
    }

    /// Remove `key` if it is past its deadline. Returns whether anything was removed;
    /// an absent key is not an error.
    pub fn expire(&self, key: &str) -> Result<bool, RelayError> {
        let _guard = self.lock_removals()?;

        let record = match self.blobs.get(key)? {
            Some(record) => record,
            None => return Ok(false),
        };
        if !record.is_expired(self.clock.now()) {
            return Ok(false);
        }

        self.remove(&record)?;
        info!("Blob {} expired ({} bytes)", key, record.size);
        Ok(true)
    }

    /// Expire up to `limit` blobs whose deadline has passed. Returns the
    /// number of blobs removed.
    ///
    /// Every due index entry is consumed: entries left behind by an already
    /// removed blob are dropped, and records that no longer decode are
    /// discarded. Other failures are logged and left for the next sweep.
    pub fn sweep_expired(&self, limit: usize) -> Result<usize, RelayError> {
        let entries = self.blobs.expired_entries(self.clock.now(), limit)?;
        let mut removed = 0;
        for (deadline, key) in entries {
            match self.expire(&key) {
                Ok(true) => removed += 1,
                Ok(false) => {
                    debug!("Dropping stale expiry entry for {}", key);
                    if let Err(e) = self.blobs.drop_index_entry(deadline, &key) {
                        error!("Failed to drop expiry entry for {}: {}", key, e);
                    }
                }
                Err(RelayError::Store(StoreError::Codec(e))) => {
                    error!(
                        "Blob {} is undecodable ({}), discarding it; its size cannot be released from quotas",
                        key, e
                    );
                    match self.blobs.discard(deadline, &key) {
                        Ok(()) => removed += 1,
                        Err(e) => error!("Failed to discard blob {}: {}", key, e),
                    }
                }
                Err(e) => error!("Failed to expire blob {}: {}", key, e),
            }
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<StatsState, RelayError> {
        Ok(self.stats.get_service_stats()?)
    }

    pub fn quotas(&self) -> Result<QuotaState, RelayError> {
        Ok(self.quotas.snapshot()?)
    }

    fn remove(&self, record: &BlobRecord) -> Result<(), RelayError> {
        self.stats.record_deletion(record.size)?;
        self.quotas.update_quotas(record.size, false)?;
        self.blobs.delete(&record.key)?;
        Ok(())
    }

    fn lock_removals(&self) -> Result<MutexGuard<'_, ()>, RelayError> {
        self.removal_lock
            .lock()
            .map_err(|_| RelayError::Internal("removal lock poisoned".to_string()))
    }
}

/// Compare deletion secrets in constant time. Hashing first hides the length.
fn secrets_match(stored: &str, presented: &str) -> bool {
    let stored = Sha256::digest(stored.as_bytes());
    let presented = Sha256::digest(presented.as_bytes());
    stored.as_slice().ct_eq(presented.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::mock_store::MockKvStore;
    use chrono::{TimeZone, Utc};

    fn service() -> RelayService {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()));
        RelayService::new(
            Arc::new(MockKvStore::new()),
            clock,
            QuotaLimits { max_storage: 10_000, max_monthly_transfer: 10_000 },
            Duration::hours(24),
        )
    }

    #[test]
    fn test_upload_rejects_bad_input() {
        let service = service();
        let body = b"ciphertext".to_vec();
        let key = content_hash(&body);

        assert!(matches!(service.upload("nothex", body.clone(), "dk"), Err(RelayError::Validation(_))));
        assert!(matches!(service.upload(&key, body.clone(), ""), Err(RelayError::Validation(_))));
        assert!(matches!(service.upload(&content_hash(b""), Vec::new(), "dk"), Err(RelayError::Validation(_))));
        assert!(matches!(service.upload(&"0".repeat(64), body, "dk"), Err(RelayError::Validation(_))));

        assert_eq!(service.quotas().unwrap().current_storage, 0);
    }

    #[test]
    fn test_upload_accepts_enc_suffix() {
        let service = service();
        let body = b"ciphertext".to_vec();
        let key = content_hash(&body);

        service.upload(&format!("{}.enc", key), body.clone(), "dk").unwrap();
        assert_eq!(service.download(&key).unwrap().content, body);
    }

    #[test]
    fn test_delete_checks_secret() {
        let service = service();
        let body = b"secret stuff".to_vec();
        let key = content_hash(&body);
        service.upload(&key, body, "right").unwrap();

        assert!(matches!(service.delete(&key, "wrong"), Err(RelayError::Forbidden)));
        assert!(service.download(&key).is_ok());

        service.delete(&key, "right").unwrap();
        assert!(matches!(service.download(&key), Err(RelayError::NotFound)));
        assert!(matches!(service.delete(&key, "right"), Err(RelayError::NotFound)));
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("right", "right"));
        assert!(!secrets_match("right", "wrong"));
        assert!(!secrets_match("right", "righ"));
        assert!(!secrets_match("right", "right "));
        assert!(!secrets_match("right", ""));
    }

    #[test]
    fn test_expire_ignores_live_and_absent_blobs() {
        let service = service();
        let body = b"still fresh".to_vec();
        let key = content_hash(&body);
        service.upload(&key, body, "dk").unwrap();

        assert!(!service.expire(&key).unwrap());
        assert!(!service.expire(&"f".repeat(64)).unwrap());
        assert!(service.download(&key).is_ok());
    }
}
