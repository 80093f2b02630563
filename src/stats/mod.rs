//! Usage Statistics Recorder
//!
//! Lifetime and per-day byte counters for uploads, downloads and deletions,
//! kept in the `stats` singleton record. Daily buckets are keyed by UTC date
//! and only the last 30 days are retained.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::kv::{read_record, update_record, KvStore, Namespace, SINGLETON_KEY};

/// Number of days of daily buckets kept behind the current date
pub const DAILY_RETENTION_DAYS: i64 = 30;

/// Per-day counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayStats {
    pub bytes_transferred: u64,
    pub bytes_stored: u64,
    /// When the bucket was opened
    pub timestamp: DateTime<Utc>,
}

impl DayStats {
    fn open(now: DateTime<Utc>) -> Self {
        Self {
            bytes_transferred: 0,
            bytes_stored: 0,
            timestamp: now,
        }
    }
}

/// Persisted statistics record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatsState {
    /// Uploads + downloads, never decremented
    pub total_bytes_transferred: u64,
    /// Uploads only, never decremented
    pub total_bytes_stored: u64,
    /// Live bytes, decremented on deletion and expiry
    pub current_bytes_stored: u64,
    /// `YYYY-MM-DD` (UTC) -> counters
    pub daily_stats: BTreeMap<String, DayStats>,
}

/// Date key of the daily bucket `at` falls in
pub fn date_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

impl StatsState {
    fn today(&mut self, now: DateTime<Utc>) -> &mut DayStats {
        self.daily_stats
            .entry(date_key(now))
            .or_insert_with(|| DayStats::open(now))
    }

    /// Drop daily buckets older than the retention window
    fn prune(&mut self, now: DateTime<Utc>) {
        let oldest_allowed = date_key(now - Duration::days(DAILY_RETENTION_DAYS));
        self.daily_stats.retain(|date, _| date.as_str() >= oldest_allowed.as_str());
    }
}

pub struct StatsRecorder {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl StatsRecorder {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn apply<F>(&self, mutate: F) -> Result<StatsState, StoreError>
    where
        F: FnMut(&mut StatsState),
    {
        update_record(
            self.store.as_ref(),
            Namespace::Stats,
            SINGLETON_KEY,
            StatsState::default,
            mutate,
        )
    }

    pub fn record_upload(&self, bytes: u64) -> Result<StatsState, StoreError> {
        let now = self.clock.now();
        let stats = self.apply(|stats| {
            stats.total_bytes_transferred = stats.total_bytes_transferred.saturating_add(bytes);
            stats.total_bytes_stored = stats.total_bytes_stored.saturating_add(bytes);
            stats.current_bytes_stored = stats.current_bytes_stored.saturating_add(bytes);

            let today = stats.today(now);
            today.bytes_transferred = today.bytes_transferred.saturating_add(bytes);
            today.bytes_stored = today.bytes_stored.saturating_add(bytes);

            stats.prune(now);
        })?;
        debug!("Recorded upload of {} bytes", bytes);
        Ok(stats)
    }

    pub fn record_download(&self, bytes: u64) -> Result<StatsState, StoreError> {
        let now = self.clock.now();
        let stats = self.apply(|stats| {
            stats.total_bytes_transferred = stats.total_bytes_transferred.saturating_add(bytes);
            let today = stats.today(now);
            today.bytes_transferred = today.bytes_transferred.saturating_add(bytes);
        })?;
        debug!("Recorded download of {} bytes", bytes);
        Ok(stats)
    }

    /// Historical totals are never revised; only the live counter drops
    pub fn record_deletion(&self, bytes: u64) -> Result<StatsState, StoreError> {
        self.apply(|stats| {
            if bytes > stats.current_bytes_stored {
                warn!(
                    "Stats drift: deleting {} bytes with only {} recorded as stored",
                    bytes, stats.current_bytes_stored
                );
            }
            stats.current_bytes_stored = stats.current_bytes_stored.saturating_sub(bytes);
        })
    }

    pub fn get_service_stats(&self) -> Result<StatsState, StoreError> {
        let stats = read_record(self.store.as_ref(), Namespace::Stats, SINGLETON_KEY)?;
        Ok(stats.unwrap_or_default())
    }
}

/// Human readable byte count using 1024-based units
pub fn format_bytes(bytes: u64) -> String {
    const SIZES: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < SIZES.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, SIZES[unit])
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TotalView {
    pub transferred: String,
    pub stored: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CurrentView {
    pub stored: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct DailyView {
    pub date: String,
    pub transferred: String,
    pub stored: String,
}

/// Display form served by the stats endpoint
#[derive(Debug, Serialize, PartialEq)]
pub struct ServiceStatsView {
    pub total: TotalView,
    pub current: CurrentView,
    /// Newest day first
    pub daily: Vec<DailyView>,
}

impl From<&StatsState> for ServiceStatsView {
    fn from(stats: &StatsState) -> Self {
        let daily = stats
            .daily_stats
            .iter()
            .rev()
            .map(|(date, day)| DailyView {
                date: date.clone(),
                transferred: format_bytes(day.bytes_transferred),
                stored: format_bytes(day.bytes_stored),
            })
            .collect();

        Self {
            total: TotalView {
                transferred: format_bytes(stats.total_bytes_transferred),
                stored: format_bytes(stats.total_bytes_stored),
            },
            current: CurrentView {
                stored: format_bytes(stats.current_bytes_stored),
            },
            daily,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::mock_store::MockKvStore;
    use chrono::TimeZone;

    fn recorder() -> (StatsRecorder, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 20, 8, 30, 0).unwrap()));
        (StatsRecorder::new(Arc::new(MockKvStore::new()), clock.clone()), clock)
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(1), "1.00 Bytes");
        assert_eq!(format_bytes(1023), "1023.00 Bytes");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
        assert_eq!(format_bytes(5 * 1024u64.pow(4)), "5.00 TB");
        // Past TB the unit stays TB
        assert_eq!(format_bytes(2048 * 1024u64.pow(4)), "2048.00 TB");
    }

    #[test]
    fn test_record_upload_updates_all_counters() {
        let (recorder, clock) = recorder();
        let stats = recorder.record_upload(1000).unwrap();

        assert_eq!(stats.total_bytes_transferred, 1000);
        assert_eq!(stats.total_bytes_stored, 1000);
        assert_eq!(stats.current_bytes_stored, 1000);

        let today = &stats.daily_stats[&date_key(clock.now())];
        assert_eq!(today.bytes_transferred, 1000);
        assert_eq!(today.bytes_stored, 1000);
    }

    #[test]
    fn test_record_download_only_counts_transfer() {
        let (recorder, clock) = recorder();
        recorder.record_upload(1000).unwrap();
        let stats = recorder.record_download(400).unwrap();

        assert_eq!(stats.total_bytes_transferred, 1400);
        assert_eq!(stats.total_bytes_stored, 1000);
        assert_eq!(stats.current_bytes_stored, 1000);

        let today = &stats.daily_stats[&date_key(clock.now())];
        assert_eq!(today.bytes_transferred, 1400);
        assert_eq!(today.bytes_stored, 1000);
    }

    #[test]
    fn test_upload_then_deletion_keeps_totals() {
        let (recorder, _) = recorder();
        recorder.record_upload(300).unwrap();
        let before = recorder.get_service_stats().unwrap();

        let after_upload = recorder.record_upload(500).unwrap();
        let after_delete = recorder.record_deletion(500).unwrap();

        assert_eq!(after_delete.current_bytes_stored, before.current_bytes_stored);
        assert_eq!(after_delete.total_bytes_stored, after_upload.total_bytes_stored);
        assert_eq!(after_delete.total_bytes_transferred, after_upload.total_bytes_transferred);
    }

    #[test]
    fn test_record_deletion_saturates() {
        let (recorder, _) = recorder();
        recorder.record_upload(10).unwrap();
        let stats = recorder.record_deletion(50).unwrap();
        assert_eq!(stats.current_bytes_stored, 0);
    }

    #[test]
    fn test_daily_buckets_pruned_after_thirty_days() {
        let (recorder, clock) = recorder();
        let first_day = date_key(clock.now());
        recorder.record_upload(1).unwrap();

        clock.advance(Duration::days(30));
        let stats = recorder.record_upload(1).unwrap();
        assert!(stats.daily_stats.contains_key(&first_day), "day 30 back is still retained");

        clock.advance(Duration::days(1));
        let stats = recorder.record_upload(1).unwrap();
        assert!(!stats.daily_stats.contains_key(&first_day));
        assert_eq!(stats.daily_stats.len(), 2);
        // Lifetime totals survive pruning
        assert_eq!(stats.total_bytes_stored, 3);
    }

    #[test]
    fn test_downloads_do_not_prune() {
        let (recorder, clock) = recorder();
        let first_day = date_key(clock.now());
        recorder.record_upload(1).unwrap();

        clock.advance(Duration::days(60));
        let stats = recorder.record_download(1).unwrap();
        assert!(stats.daily_stats.contains_key(&first_day));
    }

    #[test]
    fn test_service_stats_view_sorted_descending() {
        let (recorder, clock) = recorder();
        recorder.record_upload(1536).unwrap();
        clock.advance(Duration::days(1));
        recorder.record_upload(1024).unwrap();
        clock.advance(Duration::days(1));
        recorder.record_download(2048).unwrap();

        let view = ServiceStatsView::from(&recorder.get_service_stats().unwrap());
        let dates: Vec<&str> = view.daily.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-05-22", "2024-05-21", "2024-05-20"]);

        assert_eq!(view.total.transferred, "4.50 KB");
        assert_eq!(view.total.stored, "2.50 KB");
        assert_eq!(view.current.stored, "2.50 KB");
        assert_eq!(view.daily[0].stored, "0 Bytes");
        assert_eq!(view.daily[2].transferred, "1.50 KB");
    }

    #[test]
    fn test_empty_stats() {
        let (recorder, _) = recorder();
        let stats = recorder.get_service_stats().unwrap();
        assert_eq!(stats, StatsState::default());
    }
}
