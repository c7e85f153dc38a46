//! Archive-then-delete
//!
//! Rows leave the active tables only inside the transaction that wrote
//! their history copy. If the copy cannot be written, the source row stays.
//! History tables are append-only.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, Row, params};

use crate::drafts::load_draft;
use crate::error::StateError;
use crate::models::{
    ArchiveReason, ArchivedEmail, DraftFinalStatus, DraftHistoryEntry, DraftStatus, EmailAddress,
    NewSentEmail, SendMethod, SentEmail,
};
use crate::storage::codec::{
    body_from_value, bool_col, decode_addresses, encode_list, now_ts, ts, ts_col, ts_col_opt,
};
use crate::storage::{PersistentStore, set_flag};

const ARCHIVED_COLUMNS: &str = "id, original_id, account_id, folder_id, uid, message_id, subject, \
     from_name, from_email, to_addresses, cc_addresses, date, snippet, body_text, body_html, \
     thread_id, original_created_at, original_updated_at, archived_at, archive_reason, \
     is_read, is_starred, is_replied, has_attachments, size, in_reply_to, \"references\"";

const HISTORY_COLUMNS: &str = "id, original_id, account_id, to_addresses, subject, body_text, \
     reply_to_email_id, final_status, error_message, original_created_at, archived_at, \
     scheduled_send_at, sent_at, original_updated_at";

const SENT_COLUMNS: &str = "id, account_id, message_id, to_addresses, cc_addresses, \
     bcc_addresses, subject, body_text, in_reply_to, reference_ids, reply_to_email_id, \
     send_method, draft_id, sent_at";

fn archived_from_row(row: &Row<'_>) -> Result<ArchivedEmail> {
    let to: Option<String> = row.get(9)?;
    let cc: Option<String> = row.get(10)?;
    let reason: String = row.get(19)?;
    Ok(ArchivedEmail {
        id: row.get(0)?,
        original_id: row.get(1)?,
        account_id: row.get(2)?,
        folder_id: row.get(3)?,
        uid: row.get(4)?,
        message_id: row.get(5)?,
        subject: row.get(6)?,
        from: EmailAddress {
            name: row.get(7)?,
            email: row.get(8)?,
        },
        to: decode_addresses(to.as_deref()),
        cc: decode_addresses(cc.as_deref()),
        date: ts_col(row, 11)?,
        is_read: bool_col(row.get(20)?),
        is_starred: bool_col(row.get(21)?),
        is_replied: bool_col(row.get(22)?),
        has_attachments: bool_col(row.get(23)?),
        size: row.get(24)?,
        snippet: row.get(12)?,
        body_text: row.get(13)?,
        body_html: body_from_value(row.get_ref(14)?)?,
        in_reply_to: row.get(25)?,
        references: row.get(26)?,
        thread_id: row.get(15)?,
        original_created_at: ts_col(row, 16)?,
        original_updated_at: ts_col(row, 17)?,
        archived_at: ts_col(row, 18)?,
        archive_reason: reason.parse()?,
    })
}

fn history_from_row(row: &Row<'_>) -> Result<DraftHistoryEntry> {
    let to: Option<String> = row.get(3)?;
    let status: String = row.get(7)?;
    Ok(DraftHistoryEntry {
        id: row.get(0)?,
        original_id: row.get(1)?,
        account_id: row.get(2)?,
        to: decode_addresses(to.as_deref()),
        subject: row.get(4)?,
        body_text: row.get(5)?,
        reply_to_email_id: row.get(6)?,
        final_status: status.parse()?,
        error_message: row.get(8)?,
        scheduled_send_at: ts_col_opt(row, 11)?,
        sent_at: ts_col_opt(row, 12)?,
        original_created_at: ts_col(row, 9)?,
        original_updated_at: ts_col_opt(row, 13)?,
        archived_at: ts_col(row, 10)?,
    })
}

fn sent_from_row(row: &Row<'_>) -> Result<SentEmail> {
    let to: Option<String> = row.get(3)?;
    let cc: Option<String> = row.get(4)?;
    let bcc: Option<String> = row.get(5)?;
    let method: String = row.get(11)?;
    Ok(SentEmail {
        id: row.get(0)?,
        account_id: row.get(1)?,
        message_id: row.get(2)?,
        to: decode_addresses(to.as_deref()),
        cc: decode_addresses(cc.as_deref()),
        bcc: decode_addresses(bcc.as_deref()),
        subject: row.get(6)?,
        body_text: row.get(7)?,
        in_reply_to: row.get(8)?,
        references: row.get(9)?,
        reply_to_email_id: row.get(10)?,
        send_method: method.parse()?,
        draft_id: row.get(12)?,
        sent_at: ts_col(row, 13)?,
    })
}

fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    decode: fn(&Row<'_>) -> Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(decode(row)?);
    }
    Ok(out)
}

/// Copy the email into `emails_archive`, then delete it. Returns false if
/// the email does not exist. Must run inside a transaction.
fn archive_email_on(conn: &Connection, email_id: i64, reason: ArchiveReason) -> Result<bool> {
    let copied = conn.execute(
        r#"
        INSERT INTO emails_archive (
            original_id, account_id, folder_id, uid, message_id, subject, from_name,
            from_email, to_addresses, cc_addresses, date, is_read, is_starred, is_replied,
            has_attachments, size, snippet, body_text, body_html, raw_headers, in_reply_to,
            "references", thread_id, original_created_at, original_updated_at,
            archived_at, archive_reason
        )
        SELECT id, account_id, folder_id, uid, message_id, subject, from_name,
               from_email, to_addresses, cc_addresses, date, is_read, is_starred, is_replied,
               has_attachments, size, snippet, body_text, body_html, raw_headers, in_reply_to,
               "references", thread_id, created_at, updated_at, ?2, ?3
        FROM emails WHERE id = ?1
        "#,
        params![email_id, now_ts(), reason.as_str()],
    )?;
    if copied == 0 {
        return Ok(false);
    }
    conn.execute("DELETE FROM emails WHERE id = ?1", [email_id])?;
    Ok(true)
}

/// Copy the draft into `drafts_history`, then delete it.
fn archive_draft_on(
    conn: &Connection,
    draft_id: i64,
    final_status: DraftFinalStatus,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO drafts_history (
            original_id, account_id, to_addresses, cc_addresses, bcc_addresses, subject,
            body_text, body_html, in_reply_to, reference_ids, reply_to_email_id,
            final_status, error_message, scheduled_send_at, sent_at, original_created_at,
            original_updated_at, archived_at
        )
        SELECT id, account_id, to_addresses, cc_addresses, bcc_addresses, subject,
               body_text, body_html, in_reply_to, reference_ids, reply_to_email_id,
               ?2, error_message, scheduled_send_at, sent_at, created_at, updated_at, ?3
        FROM drafts WHERE id = ?1
        "#,
        params![draft_id, final_status.as_str(), now_ts()],
    )?;
    conn.execute("DELETE FROM drafts WHERE id = ?1", [draft_id])?;
    Ok(())
}

/// Append to the sent log and flag the answered email as replied.
fn insert_sent_on(conn: &Connection, sent: &NewSentEmail) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO sent_emails (
            account_id, message_id, to_addresses, cc_addresses, bcc_addresses, subject,
            body_text, in_reply_to, reference_ids, reply_to_email_id, send_method,
            draft_id, sent_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            sent.account_id,
            sent.message_id,
            encode_list(&sent.to)?,
            encode_list(&sent.cc)?,
            encode_list(&sent.bcc)?,
            sent.subject,
            sent.body_text,
            sent.in_reply_to,
            sent.references,
            sent.reply_to_email_id,
            sent.send_method.as_str(),
            sent.draft_id,
            now_ts(),
        ],
    )?;
    let id = conn.last_insert_rowid();
    if let Some(email_id) = sent.reply_to_email_id
        && !set_flag(conn, email_id, "is_replied", true)?
    {
        log::debug!("[ARCHIVE] Replied-to email {} is no longer cached", email_id);
    }
    Ok(id)
}

/// Whether a draft in `status` may be archived as `final_status`.
fn can_archive(status: DraftStatus, final_status: DraftFinalStatus) -> bool {
    match final_status {
        DraftFinalStatus::Deleted => status != DraftStatus::Sending,
        other => DraftFinalStatus::from_draft_status(status) == Some(other),
    }
}

pub struct ArchiveManager {
    store: Arc<PersistentStore>,
}

impl ArchiveManager {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    /// Move an email into the archive. Returns false if it does not exist.
    pub fn archive_permanently(&self, email_id: i64, reason: ArchiveReason) -> Result<bool> {
        let archived = self
            .store
            .with_tx(|tx| archive_email_on(tx, email_id, reason))?;
        if archived {
            log::debug!("[ARCHIVE] Email {} archived ({})", email_id, reason);
        }
        Ok(archived)
    }

    /// Archive up to `limit` tombstoned emails not updated for
    /// `older_than_days`, oldest first. Failing rows are skipped.
    pub fn purge_tombstones(
        &self,
        account_id: i64,
        older_than_days: u32,
        limit: usize,
    ) -> Result<usize> {
        let cutoff = ts(&(Utc::now() - chrono::Duration::days(i64::from(older_than_days))));
        let ids: Vec<i64> = self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id FROM emails
                WHERE account_id = ?1 AND is_deleted = 1 AND updated_at < ?2
                ORDER BY updated_at ASC, id ASC
                LIMIT ?3
                "#,
            )?;
            let ids = stmt
                .query_map(params![account_id, cutoff, limit as i64], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })?;

        let mut archived = 0;
        for id in ids {
            match self.archive_permanently(id, ArchiveReason::ServerPurged) {
                Ok(true) => archived += 1,
                Ok(false) => {}
                Err(e) => log::warn!("[ARCHIVE] Could not archive email {}: {:#}", id, e),
            }
        }
        if archived > 0 {
            log::info!("[ARCHIVE] Account {}: archived {} tombstones", account_id, archived);
        }
        Ok(archived)
    }

    /// Move a finished draft into history. Returns false if it does not
    /// exist. The draft's status must agree with `final_status`; any draft
    /// that is not mid-send can be archived as deleted.
    pub fn archive_draft(&self, draft_id: i64, final_status: DraftFinalStatus) -> Result<bool> {
        self.store.with_tx(|tx| {
            let Some(draft) = load_draft(tx, draft_id)? else {
                return Ok(false);
            };
            if !can_archive(draft.status, final_status) {
                return Err(StateError::Draft {
                    id: draft_id,
                    status: draft.status.to_string(),
                    action: "archive",
                }
                .into());
            }
            archive_draft_on(tx, draft_id, final_status)?;
            Ok(true)
        })
    }

    pub fn record_sent_email(&self, sent: &NewSentEmail) -> Result<i64> {
        self.store.with_tx(|tx| insert_sent_on(tx, sent))
    }

    /// Complete a send in one transaction: mark the draft sent, log it in
    /// the sent table and move the draft to history. The draft must be
    /// `sending` (or already `sent`). Returns the sent-email id.
    pub fn finalize_sent_draft(
        &self,
        draft_id: i64,
        message_id: Option<&str>,
        method: SendMethod,
    ) -> Result<i64> {
        let sent_id = self.store.with_tx(|tx| {
            let draft = load_draft(tx, draft_id)?
                .ok_or_else(|| anyhow!("Draft {} not found", draft_id))?;
            if !matches!(draft.status, DraftStatus::Sending | DraftStatus::Sent) {
                return Err(StateError::Draft {
                    id: draft_id,
                    status: draft.status.to_string(),
                    action: "finalize",
                }
                .into());
            }

            tx.execute(
                "UPDATE drafts SET status = 'sent', sent_at = COALESCE(sent_at, ?1), updated_at = ?1 WHERE id = ?2",
                params![now_ts(), draft_id],
            )?;
            let sent_id = insert_sent_on(
                tx,
                &NewSentEmail {
                    account_id: draft.account_id,
                    message_id: message_id.map(str::to_string),
                    to: draft.to,
                    cc: draft.cc,
                    bcc: draft.bcc,
                    subject: draft.subject,
                    body_text: draft.body_text,
                    in_reply_to: draft.in_reply_to,
                    references: draft.references,
                    reply_to_email_id: draft.reply_to_email_id,
                    send_method: method,
                    draft_id: Some(draft_id),
                },
            )?;
            archive_draft_on(tx, draft_id, DraftFinalStatus::Sent)?;
            Ok(sent_id)
        })?;
        log::info!("[ARCHIVE] Draft {} sent via {}", draft_id, method);
        Ok(sent_id)
    }

    /// Archived emails of an account, most recently archived first.
    pub fn list_archived(
        &self,
        account_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ArchivedEmail>> {
        let sql = format!(
            "SELECT {} FROM emails_archive WHERE account_id = ?1 \
             ORDER BY archived_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            ARCHIVED_COLUMNS
        );
        self.store.with_conn(|conn| {
            query_all(
                conn,
                &sql,
                params![account_id, limit as i64, offset as i64],
                archived_from_row,
            )
        })
    }

    pub fn get_archived(&self, id: i64) -> Result<Option<ArchivedEmail>> {
        let sql = format!("SELECT {} FROM emails_archive WHERE id = ?1", ARCHIVED_COLUMNS);
        self.store.with_conn(|conn| {
            Ok(query_all(conn, &sql, [id], archived_from_row)?.into_iter().next())
        })
    }

    pub fn count_archived(&self, account_id: i64) -> Result<usize> {
        self.store.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM emails_archive WHERE account_id = ?1",
                [account_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    pub fn list_draft_history(
        &self,
        account_id: i64,
        limit: usize,
    ) -> Result<Vec<DraftHistoryEntry>> {
        let sql = format!(
            "SELECT {} FROM drafts_history WHERE account_id = ?1 \
             ORDER BY archived_at DESC, id DESC LIMIT ?2",
            HISTORY_COLUMNS
        );
        self.store.with_conn(|conn| {
            query_all(conn, &sql, params![account_id, limit as i64], history_from_row)
        })
    }

    pub fn list_sent_emails(&self, account_id: i64, limit: usize) -> Result<Vec<SentEmail>> {
        let sql = format!(
            "SELECT {} FROM sent_emails WHERE account_id = ?1 \
             ORDER BY sent_at DESC, id DESC LIMIT ?2",
            SENT_COLUMNS
        );
        self.store.with_conn(|conn| {
            query_all(conn, &sql, params![account_id, limit as i64], sent_from_row)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drafts::DraftStore;
    use crate::error::state_error;
    use crate::models::NewDraft;
    use crate::search::SearchIndex;
    use crate::storage::create_test_store;
    use crate::sync::SyncReconciler;
    use crate::sync::fake::envelope;

    struct Fixture {
        store: Arc<PersistentStore>,
        sync: SyncReconciler,
        archive: ArchiveManager,
        drafts: DraftStore,
        account: i64,
        inbox: i64,
    }

    fn fixture() -> (Fixture, tempfile::TempDir) {
        let (store, dir) = create_test_store();
        let account = store.get_or_create_account("me@x.com", None).unwrap().id;
        let inbox = store.get_or_create_folder(account, "INBOX").unwrap().id;
        let store = Arc::new(store);
        let f = Fixture {
            sync: SyncReconciler::new(store.clone()),
            archive: ArchiveManager::new(store.clone()),
            drafts: DraftStore::new(store.clone()),
            store,
            account,
            inbox,
        };
        (f, dir)
    }

    fn exec(store: &PersistentStore, sql: &str) {
        store
            .with_conn(|conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_archive_copies_then_removes() {
        let (f, _dir) = fixture();
        let id = f
            .sync
            .upsert(
                f.account,
                f.inbox,
                &envelope(1)
                    .subject("Receipt")
                    .message_id("<r1@shop.com>")
                    .body_text("total 10")
                    .body_html("<b>total</b> 10")
                    .to(vec![EmailAddress::new("me@x.com")])
                    .read(true)
                    .starred(true)
                    .attachments(true)
                    .size(2048)
                    .in_reply_to("<order@shop.com>")
                    .references("<cart@shop.com> <order@shop.com>")
                    .build(),
            )
            .unwrap();
        f.store.set_replied(id, true).unwrap();
        let original = f.store.get_email(id).unwrap().unwrap();

        assert!(f.archive.archive_permanently(id, ArchiveReason::UserDeleted).unwrap());
        assert!(f.store.get_email(id).unwrap().is_none());
        assert!(!f.archive.archive_permanently(id, ArchiveReason::UserDeleted).unwrap());

        let archived = f.archive.list_archived(f.account, 10, 0).unwrap();
        assert_eq!(archived.len(), 1);
        let copy = &archived[0];
        assert_eq!(copy.original_id, id);
        assert_eq!(copy.archive_reason, ArchiveReason::UserDeleted);
        assert_eq!(copy.subject, "Receipt");
        assert_eq!(copy.body_html.as_deref(), Some("<b>total</b> 10"));
        assert_eq!(copy.to, vec![EmailAddress::new("me@x.com")]);
        assert_eq!(copy.original_created_at, original.created_at);
        assert_eq!(copy.original_updated_at, original.updated_at);
        assert_eq!(f.archive.get_archived(copy.id).unwrap().unwrap().uid, 1);

        // Flags and reply headers survive the move
        assert!(copy.is_read);
        assert!(copy.is_starred);
        assert!(copy.is_replied);
        assert!(copy.has_attachments);
        assert_eq!(copy.size, 2048);
        assert_eq!(copy.in_reply_to.as_deref(), Some("<order@shop.com>"));
        assert_eq!(copy.references.as_deref(), Some("<cart@shop.com> <order@shop.com>"));

        // The search mirror follows the delete
        let search = SearchIndex::new(f.store.clone());
        assert!(search.search(f.account, "Receipt", 10).unwrap().is_empty());
    }

    #[test]
    fn test_failed_archive_write_keeps_source() {
        let (f, _dir) = fixture();
        let id = f.sync.upsert(f.account, f.inbox, &envelope(1).build()).unwrap();

        exec(
            &f.store,
            "CREATE TRIGGER block_archive BEFORE INSERT ON emails_archive
             BEGIN SELECT RAISE(ABORT, 'archive unavailable'); END;",
        );
        let err = f
            .archive
            .archive_permanently(id, ArchiveReason::ManualArchive)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("archive unavailable"));
        assert!(f.store.get_email(id).unwrap().is_some());
        assert_eq!(f.archive.count_archived(f.account).unwrap(), 0);

        exec(&f.store, "DROP TRIGGER block_archive;");
        assert!(f.archive.archive_permanently(id, ArchiveReason::ManualArchive).unwrap());
        assert!(f.store.get_email(id).unwrap().is_none());
        assert_eq!(f.archive.count_archived(f.account).unwrap(), 1);
    }

    #[test]
    fn test_purge_tombstones_only_takes_old_ones() {
        let (f, _dir) = fixture();
        let old = f.sync.upsert(f.account, f.inbox, &envelope(1).build()).unwrap();
        let recent = f.sync.upsert(f.account, f.inbox, &envelope(2).build()).unwrap();
        let live = f.sync.upsert(f.account, f.inbox, &envelope(3).build()).unwrap();
        f.store.tombstone(old).unwrap();
        f.store.tombstone(recent).unwrap();
        exec(
            &f.store,
            &format!(
                "UPDATE emails SET updated_at = '2020-01-01T00:00:00.000Z' WHERE id IN ({}, {})",
                old, live
            ),
        );

        assert_eq!(f.archive.purge_tombstones(f.account, 30, 100).unwrap(), 1);
        assert!(f.store.get_email(old).unwrap().is_none());
        assert!(f.store.get_email(recent).unwrap().is_some());
        assert!(f.store.get_email(live).unwrap().is_some());

        let archived = f.archive.list_archived(f.account, 10, 0).unwrap();
        assert_eq!(archived[0].archive_reason, ArchiveReason::ServerPurged);
        assert_eq!(f.archive.purge_tombstones(f.account, 30, 100).unwrap(), 0);
    }

    #[test]
    fn test_archive_draft_checks_status() {
        let (f, _dir) = fixture();
        let draft = f
            .drafts
            .create(&NewDraft {
                account_id: f.account,
                subject: "Never mind".to_string(),
                ..Default::default()
            })
            .unwrap();

        let err = f.archive.archive_draft(draft.id, DraftFinalStatus::Sent).unwrap_err();
        assert!(matches!(
            state_error(&err),
            Some(StateError::Draft { action: "archive", .. })
        ));

        f.drafts.cancel(draft.id).unwrap();
        assert!(f.archive.archive_draft(draft.id, DraftFinalStatus::Cancelled).unwrap());
        assert!(f.drafts.get(draft.id).unwrap().is_none());
        assert!(!f.archive.archive_draft(draft.id, DraftFinalStatus::Cancelled).unwrap());

        let other = f
            .drafts
            .create(&NewDraft {
                account_id: f.account,
                ..Default::default()
            })
            .unwrap();
        assert!(f.archive.archive_draft(other.id, DraftFinalStatus::Deleted).unwrap());

        let history = f.archive.list_draft_history(f.account, 10).unwrap();
        assert_eq!(history.len(), 2);
        let cancelled = history.iter().find(|h| h.original_id == draft.id).unwrap();
        assert_eq!(cancelled.final_status, DraftFinalStatus::Cancelled);
        assert_eq!(cancelled.subject, "Never mind");
    }

    #[test]
    fn test_finalize_sent_draft() {
        let (f, _dir) = fixture();
        let original = f
            .sync
            .upsert(f.account, f.inbox, &envelope(1).message_id("<q@corp.com>").build())
            .unwrap();
        let draft = f
            .drafts
            .create(&NewDraft {
                account_id: f.account,
                to: vec![EmailAddress::new("sender@example.com")],
                subject: "Re: Message 1".to_string(),
                body_text: "Sounds good".to_string(),
                in_reply_to: Some("<q@corp.com>".to_string()),
                reply_to_email_id: Some(original),
                ..Default::default()
            })
            .unwrap();

        let err = f
            .archive
            .finalize_sent_draft(draft.id, Some("<a@x.com>"), SendMethod::Smtp)
            .unwrap_err();
        assert!(state_error(&err).is_some());

        f.drafts.mark_sending(draft.id).unwrap();
        let sent_id = f
            .archive
            .finalize_sent_draft(draft.id, Some("<a@x.com>"), SendMethod::Smtp)
            .unwrap();

        let sent = f.archive.list_sent_emails(f.account, 10).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, sent_id);
        assert_eq!(sent[0].draft_id, Some(draft.id));
        assert_eq!(sent[0].send_method, SendMethod::Smtp);
        assert_eq!(sent[0].message_id.as_deref(), Some("<a@x.com>"));
        assert_eq!(sent[0].to, vec![EmailAddress::new("sender@example.com")]);

        assert!(f.drafts.get(draft.id).unwrap().is_none());
        let history = f.archive.list_draft_history(f.account, 10).unwrap();
        assert_eq!(history[0].final_status, DraftFinalStatus::Sent);
        assert!(history[0].sent_at.is_some());
        assert!(history[0].original_updated_at.is_some());
        assert!(f.store.get_email(original).unwrap().unwrap().is_replied);
    }

    #[test]
    fn test_record_sent_email_marks_reply() {
        let (f, _dir) = fixture();
        let original = f.sync.upsert(f.account, f.inbox, &envelope(1).build()).unwrap();
        f.archive
            .record_sent_email(&NewSentEmail {
                account_id: f.account,
                message_id: None,
                to: vec![EmailAddress::new("sender@example.com")],
                cc: Vec::new(),
                bcc: Vec::new(),
                subject: "Re: Message 1".to_string(),
                body_text: "ok".to_string(),
                in_reply_to: None,
                references: None,
                reply_to_email_id: Some(original),
                send_method: SendMethod::Api,
                draft_id: None,
            })
            .unwrap();
        assert!(f.store.get_email(original).unwrap().unwrap().is_replied);
        assert_eq!(f.archive.list_sent_emails(f.account, 10).unwrap().len(), 1);
    }
}
