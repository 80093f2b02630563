//! Quota Ledger
//!
//! Tracks live storage and monthly accepted-upload volume against the
//! configured caps. The caps are soft: `check_quota` does not reserve, so two
//! uploads racing between their check and their `update_quotas` can jointly
//! overshoot by one object each. Every individual mutation of the ledger is
//! an atomic read-modify-write of the `quotas` record, so no increment is lost.

use chrono::{DateTime, Datelike, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::kv::{read_record, update_record, KvStore, Namespace, SINGLETON_KEY};

/// Persisted quota counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaState {
    /// Sum of the sizes of all live blobs
    pub current_storage: u64,
    /// Bytes accepted through uploads in the current calendar month
    pub monthly_transfer: u64,
    /// Last time `monthly_transfer` was zeroed
    pub last_reset: DateTime<Utc>,
}

impl QuotaState {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            current_storage: 0,
            monthly_transfer: 0,
            last_reset: now,
        }
    }

    /// Whether `now` falls in a different calendar month than the last reset
    pub fn month_rolled_over(&self, now: DateTime<Utc>) -> bool {
        self.last_reset.year() != now.year() || self.last_reset.month() != now.month()
    }

    fn roll_over(&mut self, now: DateTime<Utc>) {
        if self.month_rolled_over(now) {
            info!(
                "Resetting monthly transfer counter ({} bytes since {})",
                self.monthly_transfer, self.last_reset
            );
            self.monthly_transfer = 0;
            self.last_reset = now;
        }
    }
}

/// Configured caps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub max_storage: u64,
    pub max_monthly_transfer: u64,
}

pub struct QuotaLedger {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    limits: QuotaLimits,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, limits: QuotaLimits) -> Self {
        Self { store, clock, limits }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// Current ledger state, without applying the monthly reset
    pub fn snapshot(&self) -> Result<QuotaState, StoreError> {
        let state = read_record(self.store.as_ref(), Namespace::Quotas, SINGLETON_KEY)?;
        Ok(state.unwrap_or_else(|| QuotaState::fresh(self.clock.now())))
    }

    /// Apply the lazy monthly reset and return the resulting state.
    /// Only writes when the month actually changed.
    fn current(&self) -> Result<QuotaState, StoreError> {
        let now = self.clock.now();
        let state: Option<QuotaState> = read_record(self.store.as_ref(), Namespace::Quotas, SINGLETON_KEY)?;
        match state {
            Some(state) if !state.month_rolled_over(now) => Ok(state),
            Some(_) => update_record(
                self.store.as_ref(),
                Namespace::Quotas,
                SINGLETON_KEY,
                || QuotaState::fresh(now),
                |state: &mut QuotaState| state.roll_over(now),
            ),
            None => Ok(QuotaState::fresh(now)),
        }
    }

    /// True when an object of `size` bytes fits under both caps
    pub fn check_quota(&self, size: u64) -> Result<bool, StoreError> {
        let state = self.current()?;

        if state.current_storage.saturating_add(size) > self.limits.max_storage {
            warn!(
                "Storage quota exceeded: {} + {} > {}",
                state.current_storage, size, self.limits.max_storage
            );
            return Ok(false);
        }

        if state.monthly_transfer.saturating_add(size) > self.limits.max_monthly_transfer {
            warn!(
                "Monthly transfer quota exceeded: {} + {} > {}",
                state.monthly_transfer, size, self.limits.max_monthly_transfer
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// Record an accepted upload (`is_upload`) or the removal of a stored object
    pub fn update_quotas(&self, size: u64, is_upload: bool) -> Result<QuotaState, StoreError> {
        let now = self.clock.now();
        let state = update_record(
            self.store.as_ref(),
            Namespace::Quotas,
            SINGLETON_KEY,
            || QuotaState::fresh(now),
            |state: &mut QuotaState| {
                state.roll_over(now);
                if is_upload {
                    state.current_storage = state.current_storage.saturating_add(size);
                    state.monthly_transfer = state.monthly_transfer.saturating_add(size);
                } else if size > state.current_storage {
                    warn!(
                        "Quota ledger drift: removing {} bytes with only {} recorded, clamping to zero",
                        size, state.current_storage
                    );
                    state.current_storage = 0;
                } else {
                    state.current_storage -= size;
                }
            },
        )?;
        debug!(
            "Quotas updated: storage={} monthly_transfer={}",
            state.current_storage, state.monthly_transfer
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::mock_store::MockKvStore;
    use chrono::{Duration, TimeZone};

    fn ledger(max_storage: u64, max_monthly_transfer: u64) -> (QuotaLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()));
        let ledger = QuotaLedger::new(
            Arc::new(MockKvStore::new()),
            clock.clone(),
            QuotaLimits { max_storage, max_monthly_transfer },
        );
        (ledger, clock)
    }

    #[test]
    fn test_check_quota_respects_storage_cap() {
        let (ledger, _) = ledger(2000, 5000);

        assert!(ledger.check_quota(2000).unwrap());
        assert!(!ledger.check_quota(2001).unwrap());

        ledger.update_quotas(1000, true).unwrap();
        assert!(ledger.check_quota(1000).unwrap());
        assert!(!ledger.check_quota(1500).unwrap());
    }

    #[test]
    fn test_check_quota_respects_monthly_cap() {
        let (ledger, _) = ledger(10_000, 5000);

        ledger.update_quotas(3000, true).unwrap();
        ledger.update_quotas(3000, false).unwrap();

        // Storage is back to zero but the month already accepted 3000 bytes
        let state = ledger.snapshot().unwrap();
        assert_eq!(state.current_storage, 0);
        assert_eq!(state.monthly_transfer, 3000);
        assert!(ledger.check_quota(2000).unwrap());
        assert!(!ledger.check_quota(2001).unwrap());
    }

    #[test]
    fn test_check_quota_does_not_reserve() {
        let (ledger, _) = ledger(2000, 5000);
        assert!(ledger.check_quota(1500).unwrap());
        assert!(ledger.check_quota(1500).unwrap());
        assert_eq!(ledger.snapshot().unwrap().current_storage, 0);
    }

    #[test]
    fn test_update_quotas_deletion_only_touches_storage() {
        let (ledger, _) = ledger(10_000, 10_000);
        ledger.update_quotas(700, true).unwrap();
        let state = ledger.update_quotas(200, false).unwrap();
        assert_eq!(state.current_storage, 500);
        assert_eq!(state.monthly_transfer, 700);
    }

    #[test]
    fn test_update_quotas_clamps_at_zero() {
        let (ledger, _) = ledger(10_000, 10_000);
        ledger.update_quotas(100, true).unwrap();
        let state = ledger.update_quotas(250, false).unwrap();
        assert_eq!(state.current_storage, 0);
    }

    #[test]
    fn test_monthly_reset_on_check() {
        let (ledger, clock) = ledger(10_000, 5000);
        ledger.update_quotas(4000, true).unwrap();
        assert!(!ledger.check_quota(2000).unwrap());

        // Several months later: a single reset, storage untouched
        clock.advance(Duration::days(95));
        assert!(ledger.check_quota(2000).unwrap());

        let state = ledger.snapshot().unwrap();
        assert_eq!(state.monthly_transfer, 0);
        assert_eq!(state.current_storage, 4000);
        assert_eq!(state.last_reset, clock.now());
    }

    #[test]
    fn test_monthly_reset_on_update() {
        let (ledger, clock) = ledger(10_000, 10_000);
        ledger.update_quotas(4000, true).unwrap();

        clock.set(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 1).unwrap());
        let state = ledger.update_quotas(100, true).unwrap();
        assert_eq!(state.monthly_transfer, 100);
        assert_eq!(state.current_storage, 4100);
    }

    #[test]
    fn test_same_month_next_year_still_resets() {
        let (ledger, clock) = ledger(10_000, 10_000);
        ledger.update_quotas(4000, true).unwrap();

        clock.advance(Duration::days(365));
        assert!(ledger.check_quota(1).unwrap());
        assert_eq!(ledger.snapshot().unwrap().monthly_transfer, 0);
    }

    #[test]
    fn test_no_reset_within_month() {
        let (ledger, clock) = ledger(10_000, 10_000);
        ledger.update_quotas(4000, true).unwrap();
        let before = ledger.snapshot().unwrap().last_reset;

        clock.advance(Duration::days(10));
        assert!(ledger.check_quota(1).unwrap());
        let state = ledger.snapshot().unwrap();
        assert_eq!(state.monthly_transfer, 4000);
        assert_eq!(state.last_reset, before);
    }
}
