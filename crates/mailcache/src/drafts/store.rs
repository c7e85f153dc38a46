//! Outgoing drafts and their send lifecycle
//!
//! ```text
//! draft ──schedule──▶ scheduled ──unschedule──▶ draft
//! draft|scheduled ──mark_sending──▶ sending ──mark_sent──▶ sent
//!                                      └──mark_failed──▶ failed ──retry──▶ draft
//! draft|scheduled ──cancel──▶ cancelled
//! ```
//!
//! Finished drafts leave this table through
//! [`ArchiveManager::archive_draft`](crate::archive::ArchiveManager::archive_draft).

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use crate::error::StateError;
use crate::models::{Draft, DraftStatus, DraftUpdate, NewDraft};
use crate::storage::PersistentStore;
use crate::storage::codec::{
    body_from_value, compress_text, decode_addresses, encode_list, now_ts, ts, ts_col,
    ts_col_opt,
};

const DRAFT_COLUMNS: &str = "id, account_id, to_addresses, cc_addresses, bcc_addresses, subject, \
     body_text, body_html, in_reply_to, reference_ids, reply_to_email_id, status, \
     scheduled_send_at, sent_at, error_message, created_at, updated_at";

fn draft_from_row(row: &Row<'_>) -> Result<Draft> {
    let to: Option<String> = row.get(2)?;
    let cc: Option<String> = row.get(3)?;
    let bcc: Option<String> = row.get(4)?;
    let status: String = row.get(11)?;

    Ok(Draft {
        id: row.get(0)?,
        account_id: row.get(1)?,
        to: decode_addresses(to.as_deref()),
        cc: decode_addresses(cc.as_deref()),
        bcc: decode_addresses(bcc.as_deref()),
        subject: row.get(5)?,
        body_text: row.get(6)?,
        body_html: body_from_value(row.get_ref(7)?)?,
        in_reply_to: row.get(8)?,
        references: row.get(9)?,
        reply_to_email_id: row.get(10)?,
        status: status.parse()?,
        scheduled_send_at: ts_col_opt(row, 12)?,
        sent_at: ts_col_opt(row, 13)?,
        error_message: row.get(14)?,
        created_at: ts_col(row, 15)?,
        updated_at: ts_col(row, 16)?,
    })
}

fn query_drafts(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Draft>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut drafts = Vec::new();
    while let Some(row) = rows.next()? {
        drafts.push(draft_from_row(row)?);
    }
    Ok(drafts)
}

pub(crate) fn load_draft(conn: &Connection, id: i64) -> Result<Option<Draft>> {
    let sql = format!("SELECT {} FROM drafts WHERE id = ?1", DRAFT_COLUMNS);
    Ok(query_drafts(conn, &sql, [id])?.into_iter().next())
}

pub struct DraftStore {
    store: Arc<PersistentStore>,
}

impl DraftStore {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    pub fn create(&self, draft: &NewDraft) -> Result<Draft> {
        let body_html = draft.body_html.as_deref().map(compress_text).transpose()?;
        self.store.with_tx(|tx| {
            let now = now_ts();
            tx.execute(
                r#"
                INSERT INTO drafts (
                    account_id, to_addresses, cc_addresses, bcc_addresses, subject,
                    body_text, body_html, in_reply_to, reference_ids, reply_to_email_id,
                    status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'draft', ?11, ?11)
                "#,
                params![
                    draft.account_id,
                    encode_list(&draft.to)?,
                    encode_list(&draft.cc)?,
                    encode_list(&draft.bcc)?,
                    draft.subject,
                    draft.body_text,
                    body_html,
                    draft.in_reply_to,
                    draft.references,
                    draft.reply_to_email_id,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            load_draft(tx, id)?.ok_or_else(|| anyhow!("Draft {} vanished after insert", id))
        })
    }

    /// Edit content. Only drafts in `draft` status can change.
    pub fn update(&self, id: i64, update: &DraftUpdate) -> Result<Draft> {
        let body_html = update.body_html.as_deref().map(compress_text).transpose()?;
        self.store.with_tx(|tx| {
            let current = load_draft(tx, id)?.ok_or_else(|| anyhow!("Draft {} not found", id))?;
            if current.status != DraftStatus::Draft {
                return Err(StateError::Draft {
                    id,
                    status: current.status.to_string(),
                    action: "edit",
                }
                .into());
            }

            tx.execute(
                r#"
                UPDATE drafts SET
                    to_addresses = ?1, cc_addresses = ?2, bcc_addresses = ?3,
                    subject = ?4, body_text = ?5, body_html = COALESCE(?6, body_html),
                    updated_at = ?7
                WHERE id = ?8
                "#,
                params![
                    encode_list(update.to.as_ref().unwrap_or(&current.to))?,
                    encode_list(update.cc.as_ref().unwrap_or(&current.cc))?,
                    encode_list(update.bcc.as_ref().unwrap_or(&current.bcc))?,
                    update.subject.as_ref().unwrap_or(&current.subject),
                    update.body_text.as_ref().unwrap_or(&current.body_text),
                    body_html,
                    now_ts(),
                    id,
                ],
            )?;
            load_draft(tx, id)?.ok_or_else(|| anyhow!("Draft {} not found", id))
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Draft>> {
        self.store.with_conn(|conn| load_draft(conn, id))
    }

    /// Drafts of an account, most recently edited first.
    pub fn list(&self, account_id: i64, status: Option<DraftStatus>) -> Result<Vec<Draft>> {
        let sql = format!(
            r#"
            SELECT {} FROM drafts
            WHERE account_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY updated_at DESC, id DESC
            "#,
            DRAFT_COLUMNS
        );
        self.store.with_conn(|conn| {
            query_drafts(conn, &sql, params![account_id, status.map(|s| s.as_str())])
        })
    }

    /// Guarded status change. `set` may use `?1` for `value`.
    fn transition(
        &self,
        id: i64,
        action: &'static str,
        from: &[DraftStatus],
        to: DraftStatus,
        set: &str,
        value: Option<String>,
    ) -> Result<Draft> {
        let allowed = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE drafts SET status = '{}'{}, updated_at = ?2 WHERE id = ?3 AND status IN ({})",
            to.as_str(),
            set,
            allowed
        );

        let draft = self.store.with_tx(|tx| {
            let n = tx.execute(&sql, params![value, now_ts(), id])?;
            let draft = load_draft(tx, id)?.ok_or_else(|| anyhow!("Draft {} not found", id))?;
            if n == 0 {
                return Err(StateError::Draft {
                    id,
                    status: draft.status.to_string(),
                    action,
                }
                .into());
            }
            Ok(draft)
        })?;
        log::debug!("[DRAFT] Draft {}: {} -> {}", id, action, draft.status);
        Ok(draft)
    }

    pub fn schedule(&self, id: i64, send_at: DateTime<Utc>) -> Result<Draft> {
        self.transition(
            id,
            "schedule",
            &[DraftStatus::Draft],
            DraftStatus::Scheduled,
            ", scheduled_send_at = ?1",
            Some(ts(&send_at)),
        )
    }

    pub fn unschedule(&self, id: i64) -> Result<Draft> {
        self.transition(
            id,
            "unschedule",
            &[DraftStatus::Scheduled],
            DraftStatus::Draft,
            ", scheduled_send_at = NULL",
            None,
        )
    }

    pub fn cancel(&self, id: i64) -> Result<Draft> {
        self.transition(
            id,
            "cancel",
            &[DraftStatus::Draft, DraftStatus::Scheduled],
            DraftStatus::Cancelled,
            "",
            None,
        )
    }

    pub fn mark_sending(&self, id: i64) -> Result<Draft> {
        self.transition(
            id,
            "send",
            &[DraftStatus::Draft, DraftStatus::Scheduled],
            DraftStatus::Sending,
            "",
            None,
        )
    }

    pub fn mark_sent(&self, id: i64) -> Result<Draft> {
        self.transition(
            id,
            "mark sent",
            &[DraftStatus::Sending],
            DraftStatus::Sent,
            ", sent_at = ?2, error_message = NULL",
            None,
        )
    }

    pub fn mark_failed(&self, id: i64, error: &str) -> Result<Draft> {
        let draft = self.transition(
            id,
            "mark failed",
            &[DraftStatus::Sending],
            DraftStatus::Failed,
            ", error_message = ?1",
            Some(error.to_string()),
        )?;
        log::warn!("[DRAFT] Draft {} failed to send: {}", id, error);
        Ok(draft)
    }

    /// `failed` → `draft`, clearing the error.
    pub fn retry(&self, id: i64) -> Result<Draft> {
        self.transition(
            id,
            "retry",
            &[DraftStatus::Failed],
            DraftStatus::Draft,
            ", error_message = NULL, scheduled_send_at = NULL",
            None,
        )
    }

    /// Scheduled drafts whose send time is at or before `now`, oldest first.
    pub fn due_for_send(&self, now: DateTime<Utc>) -> Result<Vec<Draft>> {
        let sql = format!(
            r#"
            SELECT {} FROM drafts
            WHERE status = 'scheduled' AND scheduled_send_at <= ?1
            ORDER BY scheduled_send_at ASC, id ASC
            "#,
            DRAFT_COLUMNS
        );
        self.store
            .with_conn(|conn| query_drafts(conn, &sql, [ts(&now)]))
    }

    /// Drafts not yet sent or scheduled to be sent
    pub fn count_pending(&self, account_id: i64) -> Result<usize> {
        self.store.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM drafts WHERE account_id = ?1 AND status IN ('draft', 'scheduled')",
                [account_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}
