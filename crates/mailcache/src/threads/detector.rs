//! Thread assignment and thread queries

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use super::derive::{clean_message_id, derive_thread_id};
use crate::models::{EmailSummary, TRASH_SPAM_PATTERNS};
use crate::storage::codec::now_ts;
use crate::storage::{PersistentStore, SUMMARY_COLUMNS, load_email, select_list, summary_from_row};

/// SQL expression for a cleaned message id column
const CLEAN_ID: &str = "lower(trim(message_id, '<> '))";

pub struct ThreadDetector {
    store: Arc<PersistentStore>,
}

/// Clause excluding trash and spam folders, for a folder-name column.
fn not_trash_or_spam(name_column: &str) -> String {
    TRASH_SPAM_PATTERNS
        .iter()
        .map(|p| format!("lower({}) NOT LIKE '%{}%'", name_column, p))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// CTEs selecting the visible, deduplicated rows of a thread.
/// Binds ?1 = thread id, ?2 = account id. Exposes `visible` and `deduped`.
fn thread_rows_cte() -> String {
    format!(
        r#"
        WITH visible AS (
            SELECT e.* FROM emails e
            JOIN folders f ON f.id = e.folder_id
            WHERE e.thread_id = ?1 AND e.account_id = ?2 AND e.is_deleted = 0
              AND {}
        ),
        deduped AS (
            SELECT MIN(id) AS id FROM visible
            GROUP BY COALESCE(NULLIF({}, ''), 'id:' || id)
        )
        "#,
        not_trash_or_spam("f.name"),
        CLEAN_ID
    )
}

impl ThreadDetector {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    /// Assign a thread id to an email from its headers.
    ///
    /// When the email replies to a message we already have, the parent's
    /// thread id is adopted so a growing conversation keeps one id. Emails
    /// whose thread id came from the server are left alone.
    ///
    /// Returns the assigned id, or `None` when the email is missing or
    /// already authoritatively threaded.
    pub fn detect_and_update(&self, email_id: i64) -> Result<Option<String>> {
        self.store.with_tx(|tx| detect_on(tx, email_id))
    }

    /// Derive thread ids for up to `limit` emails that have none. Returns
    /// how many were assigned.
    pub fn detect_unthreaded(&self, account_id: i64, limit: usize) -> Result<usize> {
        let ids: Vec<i64> = self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id FROM emails
                WHERE account_id = ?1 AND thread_id IS NULL AND thread_synced_at IS NULL
                ORDER BY date ASC
                LIMIT ?2
                "#,
            )?;
            let ids = stmt
                .query_map(params![account_id, limit as i64], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })?;

        let mut assigned = 0;
        for id in ids {
            if self.detect_and_update(id)?.is_some() {
                assigned += 1;
            }
        }
        if assigned > 0 {
            log::info!("[THREAD] Assigned threads to {} email(s)", assigned);
        }
        Ok(assigned)
    }

    /// Visible messages of a thread, newest first.
    ///
    /// Tombstones and trash/spam folders are excluded, and copies of the
    /// same message in several folders collapse into one row.
    pub fn list_thread(&self, thread_id: &str, account_id: i64) -> Result<Vec<EmailSummary>> {
        self.store.with_conn(|conn| {
            let sql = format!(
                "{} SELECT {} FROM visible WHERE id IN (SELECT id FROM deduped) ORDER BY date DESC, id DESC",
                thread_rows_cte(),
                select_list(SUMMARY_COLUMNS, None)
            );
            let mut stmt = conn.prepare(&sql)?;
            let emails = stmt
                .query_map(params![thread_id, account_id], summary_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(emails)
        })
    }

    pub fn count_thread_size(&self, thread_id: &str, account_id: i64) -> Result<usize> {
        self.store.with_conn(|conn| {
            let sql = format!("{} SELECT COUNT(*) FROM deduped", thread_rows_cte());
            let count: i64 =
                conn.query_row(&sql, params![thread_id, account_id], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Distinct sender addresses of a thread, lowercased and sorted.
    pub fn list_thread_participants(
        &self,
        thread_id: &str,
        account_id: i64,
    ) -> Result<Vec<String>> {
        self.store.with_conn(|conn| {
            let sql = format!(
                r#"{}
                SELECT DISTINCT lower(from_email) FROM visible
                WHERE id IN (SELECT id FROM deduped) AND from_email != ''
                ORDER BY 1
                "#,
                thread_rows_cte()
            );
            let mut stmt = conn.prepare(&sql)?;
            let senders = stmt
                .query_map(params![thread_id, account_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(senders)
        })
    }

    pub fn count_participants(&self, thread_id: &str, account_id: i64) -> Result<usize> {
        Ok(self.list_thread_participants(thread_id, account_id)?.len())
    }

    pub fn thread_for_email(&self, email_id: i64) -> Result<Option<String>> {
        self.store.with_conn(|conn| {
            let thread: Option<Option<String>> = conn
                .query_row("SELECT thread_id FROM emails WHERE id = ?1", [email_id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(thread.flatten())
        })
    }

    /// Apply thread ids supplied by the server, keyed by message id.
    ///
    /// Only rows not yet marked as thread-synced are touched; once applied,
    /// the id is never replaced by local heuristics. Returns rows updated.
    pub fn apply_authoritative_thread_ids(
        &self,
        account_id: i64,
        thread_ids: &HashMap<String, String>,
    ) -> Result<usize> {
        if thread_ids.is_empty() {
            return Ok(0);
        }
        let updated = self.store.with_tx(|tx| {
            let now = now_ts();
            let mut stmt = tx.prepare(&format!(
                r#"
                UPDATE emails SET thread_id = ?1, thread_synced_at = ?2, updated_at = ?2
                WHERE account_id = ?3 AND {} = ?4 AND thread_synced_at IS NULL
                "#,
                CLEAN_ID
            ))?;
            let mut updated = 0;
            for (message_id, thread_id) in thread_ids {
                let Some(cleaned) = clean_message_id(message_id) else {
                    continue;
                };
                updated += stmt.execute(params![thread_id, now, account_id, cleaned])?;
            }
            Ok(updated)
        })?;
        log::info!("[THREAD] Applied {} authoritative thread id(s)", updated);
        Ok(updated)
    }

    /// Emails with a message id that still lack an authoritative thread id.
    pub fn count_unsynced(&self, account_id: i64) -> Result<usize> {
        self.store.with_conn(|conn| {
            let count: i64 = conn.query_row(
                r#"
                SELECT COUNT(*) FROM emails
                WHERE account_id = ?1 AND thread_synced_at IS NULL
                  AND message_id IS NOT NULL AND message_id != '' AND is_deleted = 0
                "#,
                [account_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Message ids to ask the server about, newest first.
    pub fn list_unsynced_message_ids(&self, account_id: i64, limit: usize) -> Result<Vec<String>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT message_id FROM emails
                WHERE account_id = ?1 AND thread_synced_at IS NULL
                  AND message_id IS NOT NULL AND message_id != '' AND is_deleted = 0
                ORDER BY date DESC
                LIMIT ?2
                "#,
            )?;
            let ids = stmt
                .query_map(params![account_id, limit as i64], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }
}

fn detect_on(conn: &Connection, email_id: i64) -> Result<Option<String>> {
    let Some(email) = load_email(conn, email_id)? else {
        return Ok(None);
    };
    if email.has_authoritative_thread() {
        return Ok(None);
    }

    let mut thread_id = derive_thread_id(
        email.message_id.as_deref(),
        email.in_reply_to.as_deref(),
        email.references.as_deref(),
        &email.subject,
    );

    if let Some(parent) = email.in_reply_to.as_deref().and_then(clean_message_id) {
        let parent_thread: Option<String> = conn
            .query_row(
                &format!(
                    r#"
                    SELECT thread_id FROM emails
                    WHERE account_id = ?1 AND {} = ?2 AND thread_id IS NOT NULL AND id != ?3
                    ORDER BY thread_synced_at IS NULL, id
                    LIMIT 1
                    "#,
                    CLEAN_ID
                ),
                params![email.account_id, parent, email.id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(parent_thread) = parent_thread {
            thread_id = parent_thread;
        }
    }

    let n = conn.execute(
        "UPDATE emails SET thread_id = ?1, updated_at = ?2 WHERE id = ?3 AND thread_synced_at IS NULL",
        params![thread_id, now_ts(), email.id],
    )?;
    if n == 0 {
        return Ok(None);
    }
    log::debug!("[THREAD] Email {} -> {}", email.id, thread_id);
    Ok(Some(thread_id))
}
