//! Email rows and the envelopes the fetcher hands to sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "Ana Souza")
    pub name: Option<String>,
    /// Email address (e.g., "ana@example.com")
    pub email: String,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an address from a string like "Ana Souza <ana@example.com>"
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: (!name.is_empty()).then(|| name.to_string()),
                email: email.to_string(),
            };
        }

        Self::new(s)
    }

    /// Format the address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// A cached email row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: i64,
    pub account_id: i64,
    pub folder_id: i64,
    /// Remote identifier, unique within (account, folder)
    pub uid: u32,
    pub message_id: Option<String>,
    pub subject: String,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub date: DateTime<Utc>,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_archived: bool,
    /// Tombstone: removed on the server, kept locally until archived
    pub is_deleted: bool,
    pub is_replied: bool,
    pub has_attachments: bool,
    /// Body text has been fetched and mirrored into search
    pub body_indexed: bool,
    pub snippet: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub raw_headers: Option<String>,
    pub size: i64,
    pub in_reply_to: Option<String>,
    /// Raw References header (whitespace separated message ids)
    pub references: Option<String>,
    pub thread_id: Option<String>,
    /// Set when `thread_id` came from the server rather than local heuristics
    pub thread_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Email {
    /// Whether the thread id is authoritative and must not be recomputed
    pub fn has_authoritative_thread(&self) -> bool {
        self.thread_synced_at.is_some()
    }
}

/// Lightweight list view of an email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: i64,
    pub folder_id: i64,
    pub uid: u32,
    pub message_id: Option<String>,
    pub subject: String,
    pub from: EmailAddress,
    pub date: DateTime<Utc>,
    pub snippet: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub has_attachments: bool,
    pub thread_id: Option<String>,
}

/// An envelope as delivered by the fetcher, ready to upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmail {
    pub uid: u32,
    pub message_id: Option<String>,
    pub subject: String,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub date: DateTime<Utc>,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_deleted: bool,
    pub has_attachments: bool,
    pub snippet: String,
    /// `None` means "not fetched"; an upsert keeps any stored body.
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub raw_headers: Option<String>,
    pub size: i64,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    /// Thread id assigned by the server, if it groups conversations itself
    pub remote_thread_id: Option<String>,
}

impl NewEmail {
    pub fn builder(uid: u32) -> NewEmailBuilder {
        NewEmailBuilder::new(uid)
    }
}

/// Builder for [`NewEmail`]
pub struct NewEmailBuilder {
    inner: NewEmail,
}

impl NewEmailBuilder {
    fn new(uid: u32) -> Self {
        Self {
            inner: NewEmail {
                uid,
                message_id: None,
                subject: String::new(),
                from: EmailAddress::new("unknown@unknown.invalid"),
                to: Vec::new(),
                cc: Vec::new(),
                date: Utc::now(),
                is_read: false,
                is_starred: false,
                is_deleted: false,
                has_attachments: false,
                snippet: String::new(),
                body_text: None,
                body_html: None,
                raw_headers: None,
                size: 0,
                in_reply_to: None,
                references: None,
                remote_thread_id: None,
            },
        }
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.inner.message_id = Some(id.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.inner.subject = subject.into();
        self
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.inner.from = from;
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.inner.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.inner.cc = cc;
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.inner.date = date;
        self
    }

    pub fn read(mut self, is_read: bool) -> Self {
        self.inner.is_read = is_read;
        self
    }

    pub fn starred(mut self, is_starred: bool) -> Self {
        self.inner.is_starred = is_starred;
        self
    }

    pub fn deleted(mut self, is_deleted: bool) -> Self {
        self.inner.is_deleted = is_deleted;
        self
    }

    pub fn attachments(mut self, has_attachments: bool) -> Self {
        self.inner.has_attachments = has_attachments;
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.inner.snippet = snippet.into();
        self
    }

    pub fn body_text(mut self, text: impl Into<String>) -> Self {
        self.inner.body_text = Some(text.into());
        self
    }

    pub fn body_html(mut self, html: impl Into<String>) -> Self {
        self.inner.body_html = Some(html.into());
        self
    }

    pub fn raw_headers(mut self, headers: impl Into<String>) -> Self {
        self.inner.raw_headers = Some(headers.into());
        self
    }

    pub fn size(mut self, size: i64) -> Self {
        self.inner.size = size;
        self
    }

    pub fn in_reply_to(mut self, id: impl Into<String>) -> Self {
        self.inner.in_reply_to = Some(id.into());
        self
    }

    pub fn references(mut self, refs: impl Into<String>) -> Self {
        self.inner.references = Some(refs.into());
        self
    }

    pub fn remote_thread_id(mut self, id: impl Into<String>) -> Self {
        self.inner.remote_thread_id = Some(id.into());
        self
    }

    pub fn build(self) -> NewEmail {
        self.inner
    }
}

/// Local actions waiting to be pushed to the server for one folder
#[derive(Debug, Clone, Default)]
pub struct ServerChanges {
    pub archived: Vec<Email>,
    pub deleted: Vec<Email>,
}

impl ServerChanges {
    pub fn is_empty(&self) -> bool {
        self.archived.is_empty() && self.deleted.is_empty()
    }
}
