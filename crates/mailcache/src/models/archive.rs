//! Append-only history rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DraftStatus, EmailAddress};

text_enum! {
    /// Why an email left the active cache
    ArchiveReason {
        ServerPurged => "server_purged",
        UserDeleted => "user_deleted",
        ManualArchive => "manual_archive",
    }
}

text_enum! {
    /// How a draft ended its life
    DraftFinalStatus {
        Sent => "sent",
        Cancelled => "cancelled",
        Deleted => "deleted",
        Failed => "failed",
    }
}

impl DraftFinalStatus {
    /// Final status implied by a draft's current status, if it is terminal
    pub fn from_draft_status(status: DraftStatus) -> Option<Self> {
        match status {
            DraftStatus::Sent => Some(Self::Sent),
            DraftStatus::Cancelled => Some(Self::Cancelled),
            DraftStatus::Failed => Some(Self::Failed),
            _ => None,
        }
    }
}

text_enum! {
    /// Transport that delivered a sent email
    SendMethod {
        Smtp => "smtp",
        Api => "api",
    }
}

/// Immutable copy of an email removed from the active table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedEmail {
    pub id: i64,
    pub original_id: i64,
    pub account_id: i64,
    pub folder_id: i64,
    pub uid: u32,
    pub message_id: Option<String>,
    pub subject: String,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub date: DateTime<Utc>,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_replied: bool,
    pub has_attachments: bool,
    pub size: i64,
    pub snippet: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub thread_id: Option<String>,
    pub original_created_at: DateTime<Utc>,
    pub original_updated_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
    pub archive_reason: ArchiveReason,
}

/// Immutable copy of a finished draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftHistoryEntry {
    pub id: i64,
    pub original_id: i64,
    pub account_id: i64,
    pub to: Vec<EmailAddress>,
    pub subject: String,
    pub body_text: String,
    pub reply_to_email_id: Option<i64>,
    pub final_status: DraftFinalStatus,
    pub error_message: Option<String>,
    pub scheduled_send_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub original_created_at: DateTime<Utc>,
    /// Absent on rows archived before this column existed
    pub original_updated_at: Option<DateTime<Utc>>,
    pub archived_at: DateTime<Utc>,
}

/// An entry of the sent-mail log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentEmail {
    pub id: i64,
    pub account_id: i64,
    pub message_id: Option<String>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: String,
    pub body_text: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub reply_to_email_id: Option<i64>,
    pub send_method: SendMethod,
    pub draft_id: Option<i64>,
    pub sent_at: DateTime<Utc>,
}

/// Fields for logging a sent email
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSentEmail {
    pub account_id: i64,
    pub message_id: Option<String>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: String,
    pub body_text: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub reply_to_email_id: Option<i64>,
    pub send_method: SendMethod,
    pub draft_id: Option<i64>,
}
