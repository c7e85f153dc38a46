//! Accounts and folders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A mailbox identity. Only the display name changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Folder name fragments that mark trash and spam folders
pub const TRASH_SPAM_PATTERNS: &[&str] = &["trash", "spam", "junk", "lixeira"];

/// A remote folder within one account.
///
/// The counts are a cache recomputed from the email rows and are not
/// authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub total_messages: u32,
    pub unread_messages: u32,
    pub last_sync: Option<DateTime<Utc>>,
}

impl Folder {
    /// Whether the folder name looks like trash or spam
    pub fn is_trash_or_spam(&self) -> bool {
        let name = self.name.to_lowercase();
        TRASH_SPAM_PATTERNS.iter().any(|p| name.contains(p))
    }
}
