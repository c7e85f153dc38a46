//! Progress of the background body indexer

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

text_enum! {
    IndexStatus {
        Idle => "idle",
        Running => "running",
        Paused => "paused",
        Completed => "completed",
        Error => "error",
    }
}

/// One row per account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentIndexState {
    pub account_id: i64,
    pub status: IndexStatus,
    pub total_emails: u64,
    pub indexed_emails: u64,
    /// Resumption cursor: remote uid of the last processed email
    pub last_indexed_uid: Option<u32>,
    /// Throughput in items per minute
    pub speed: u32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ContentIndexState {
    /// Percent complete, 0 when nothing is queued
    pub fn progress_percent(&self) -> f64 {
        if self.total_emails == 0 {
            return 0.0;
        }
        (self.indexed_emails as f64 / self.total_emails as f64 * 100.0).min(100.0)
    }

    /// Delay between items that keeps the indexer at its configured speed
    pub fn item_interval(&self) -> Duration {
        Duration::from_millis(60_000 / u64::from(self.speed.max(1)))
    }
}
