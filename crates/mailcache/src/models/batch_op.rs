//! Staged bulk operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

text_enum! {
    /// Mutation applied to every email of a batch
    BatchOperation {
        Archive => "archive",
        Delete => "delete",
        MarkRead => "mark_read",
        MarkUnread => "mark_unread",
    }
}

impl BatchOperation {
    /// Verb used in human-readable descriptions
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Archive => "Archive",
            Self::Delete => "Delete",
            Self::MarkRead => "Mark as read",
            Self::MarkUnread => "Mark as unread",
        }
    }
}

text_enum! {
    BatchOpStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Cancelled => "cancelled",
        Executed => "executed",
    }
}

impl BatchOpStatus {
    pub fn is_executable(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

/// Point-in-time copy of a targeted email, shown before confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPreview {
    pub id: i64,
    pub subject: String,
    pub from_name: Option<String>,
    pub from_email: String,
    /// Formatted as `YYYY-MM-DD HH:MM`
    pub date: String,
}

/// Selection criteria for a batch. All set criteria must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchFilter {
    /// Substring of the sender address
    pub from: Option<String>,
    pub folder_id: Option<i64>,
    /// Substring of the subject
    pub subject: Option<String>,
    pub unread_only: bool,
    pub older_than: Option<DateTime<Utc>>,
}

impl BatchFilter {
    pub fn from_sender(sender: impl Into<String>) -> Self {
        Self {
            from: Some(sender.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_none()
            && self.folder_id.is_none()
            && self.subject.is_none()
            && !self.unread_only
            && self.older_than.is_none()
    }

    /// Human-readable summary used in descriptions and stored with the op
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(from) = &self.from {
            parts.push(format!("from '{}'", from));
        }
        if let Some(subject) = &self.subject {
            parts.push(format!("with subject containing '{}'", subject));
        }
        if let Some(folder) = self.folder_id {
            parts.push(format!("in folder {}", folder));
        }
        if self.unread_only {
            parts.push("unread".to_string());
        }
        if let Some(before) = self.older_than {
            parts.push(format!("older than {}", before.format("%Y-%m-%d")));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingBatchOp {
    pub id: i64,
    pub account_id: i64,
    pub operation: BatchOperation,
    pub description: String,
    pub filter_query: String,
    pub email_ids: Vec<i64>,
    pub email_count: usize,
    pub preview: Vec<EmailPreview>,
    pub status: BatchOpStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_filter_describe() {
        let filter = BatchFilter {
            from: Some("news@shop.com".to_string()),
            unread_only: true,
            older_than: Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert_eq!(
            filter.describe(),
            "from 'news@shop.com' unread older than 2024-03-01"
        );
        assert!(BatchFilter::default().is_empty());
        assert!(!filter.is_empty());
    }

    #[test]
    fn test_executable_statuses() {
        assert!(BatchOpStatus::Pending.is_executable());
        assert!(BatchOpStatus::Confirmed.is_executable());
        assert!(!BatchOpStatus::Cancelled.is_executable());
        assert!(!BatchOpStatus::Executed.is_executable());
    }
}
