//! Mailbox statistics

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// Account-wide counts. Tombstoned emails are not counted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsOverview {
    pub total_emails: usize,
    /// Unread and still in the inbox views (not archived)
    pub unread_emails: usize,
    pub starred_emails: usize,
    pub archived_emails: usize,
    pub sent_emails: usize,
    /// Drafts not yet sent or scheduled
    pub draft_count: usize,
    /// Sum of message sizes
    pub storage_bytes: i64,
}

impl AnalyticsOverview {
    pub fn storage_mb(&self) -> f64 {
        self.storage_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderStats {
    pub email: String,
    /// Display name, or the address when the sender has none
    pub name: String,
    pub count: usize,
    pub unread: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyCount {
    /// 0-23, UTC
    pub hour: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdayCount {
    pub weekday: Weekday,
    pub count: usize,
}

/// How quickly and how often received mail gets answered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseStats {
    /// Mean minutes between a message's date and the reply sent to it
    pub avg_response_minutes: f64,
    /// Percent of received emails marked replied
    pub response_rate: f64,
    pub replied: usize,
    pub received: usize,
}
