//! Email reads and flag updates

use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::PersistentStore;
use super::codec::{body_from_value, bool_col, decode_addresses, now_ts, ts_col, ts_col_opt};
use crate::models::{Email, EmailAddress, EmailSummary, ServerChanges};

/// Columns read into [`Email`], in the order `email_from_row` expects.
pub(crate) const EMAIL_COLUMNS: &[&str] = &[
    "id",
    "account_id",
    "folder_id",
    "uid",
    "message_id",
    "subject",
    "from_name",
    "from_email",
    "to_addresses",
    "cc_addresses",
    "date",
    "is_read",
    "is_starred",
    "is_archived",
    "is_deleted",
    "is_replied",
    "has_attachments",
    "body_indexed",
    "snippet",
    "body_text",
    "body_html",
    "raw_headers",
    "size",
    "in_reply_to",
    "\"references\"",
    "thread_id",
    "thread_synced_at",
    "created_at",
    "updated_at",
];

/// Columns read into [`EmailSummary`].
pub(crate) const SUMMARY_COLUMNS: &[&str] = &[
    "id",
    "folder_id",
    "uid",
    "message_id",
    "subject",
    "from_name",
    "from_email",
    "date",
    "snippet",
    "is_read",
    "is_starred",
    "has_attachments",
    "thread_id",
];

/// Comma-separated column list, optionally qualified with a table alias.
pub(crate) fn select_list(columns: &[&str], alias: Option<&str>) -> String {
    columns
        .iter()
        .map(|c| match alias {
            Some(a) => format!("{}.{}", a, c),
            None => c.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Email rows that are visible in normal lists
pub(crate) const ACTIVE: &str = "is_deleted = 0 AND is_archived = 0";

pub(crate) fn email_from_row(row: &Row<'_>) -> rusqlite::Result<Email> {
    let to: Option<String> = row.get(8)?;
    let cc: Option<String> = row.get(9)?;
    let body_html = body_from_value(row.get_ref(20)?).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(20, rusqlite::types::Type::Blob, e.into())
    })?;

    Ok(Email {
        id: row.get(0)?,
        account_id: row.get(1)?,
        folder_id: row.get(2)?,
        uid: row.get(3)?,
        message_id: row.get(4)?,
        subject: row.get(5)?,
        from: EmailAddress {
            name: row.get(6)?,
            email: row.get(7)?,
        },
        to: decode_addresses(to.as_deref()),
        cc: decode_addresses(cc.as_deref()),
        date: ts_col(row, 10)?,
        is_read: bool_col(row.get(11)?),
        is_starred: bool_col(row.get(12)?),
        is_archived: bool_col(row.get(13)?),
        is_deleted: bool_col(row.get(14)?),
        is_replied: bool_col(row.get(15)?),
        has_attachments: bool_col(row.get(16)?),
        body_indexed: bool_col(row.get(17)?),
        snippet: row.get(18)?,
        body_text: row.get(19)?,
        body_html,
        raw_headers: row.get(21)?,
        size: row.get(22)?,
        in_reply_to: row.get(23)?,
        references: row.get(24)?,
        thread_id: row.get(25)?,
        thread_synced_at: ts_col_opt(row, 26)?,
        created_at: ts_col(row, 27)?,
        updated_at: ts_col(row, 28)?,
    })
}

pub(crate) fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<EmailSummary> {
    Ok(EmailSummary {
        id: row.get(0)?,
        folder_id: row.get(1)?,
        uid: row.get(2)?,
        message_id: row.get(3)?,
        subject: row.get(4)?,
        from: EmailAddress {
            name: row.get(5)?,
            email: row.get(6)?,
        },
        date: ts_col(row, 7)?,
        snippet: row.get(8)?,
        is_read: bool_col(row.get(9)?),
        is_starred: bool_col(row.get(10)?),
        has_attachments: bool_col(row.get(11)?),
        thread_id: row.get(12)?,
    })
}

/// Load one email by id on an existing connection or transaction.
pub(crate) fn load_email(conn: &Connection, id: i64) -> Result<Option<Email>> {
    let sql = format!(
        "SELECT {} FROM emails WHERE id = ?1",
        select_list(EMAIL_COLUMNS, None)
    );
    Ok(conn.query_row(&sql, [id], email_from_row).optional()?)
}

/// Set one integer flag column; returns whether a row changed.
pub(crate) fn set_flag(conn: &Connection, id: i64, column: &str, value: bool) -> Result<bool> {
    let sql = format!(
        "UPDATE emails SET {} = ?1, updated_at = ?2 WHERE id = ?3",
        column
    );
    let n = conn.execute(&sql, params![value as i64, now_ts(), id])?;
    Ok(n > 0)
}

impl PersistentStore {
    pub fn get_email(&self, id: i64) -> Result<Option<Email>> {
        self.with_conn(|conn| load_email(conn, id))
    }

    /// Look up an email by its natural key.
    pub fn get_email_by_uid(
        &self,
        account_id: i64,
        folder_id: i64,
        uid: u32,
    ) -> Result<Option<Email>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM emails WHERE account_id = ?1 AND folder_id = ?2 AND uid = ?3",
                select_list(EMAIL_COLUMNS, None)
            );
            Ok(conn
                .query_row(&sql, params![account_id, folder_id, uid], email_from_row)
                .optional()?)
        })
    }

    /// Visible emails of a folder, newest first.
    pub fn list_emails(
        &self,
        account_id: i64,
        folder_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EmailSummary>> {
        self.with_conn(|conn| {
            let sql = format!(
                r#"
                SELECT {} FROM emails
                WHERE account_id = ?1 AND folder_id = ?2 AND {}
                ORDER BY date DESC, id DESC
                LIMIT ?3 OFFSET ?4
                "#,
                select_list(SUMMARY_COLUMNS, None),
                ACTIVE
            );
            let mut stmt = conn.prepare(&sql)?;
            let emails = stmt
                .query_map(
                    params![account_id, folder_id, limit as i64, offset as i64],
                    summary_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(emails)
        })
    }

    /// Visible emails whose sender address matches exactly (case-insensitive).
    pub fn list_emails_by_sender(
        &self,
        account_id: i64,
        from_email: &str,
        limit: usize,
    ) -> Result<Vec<EmailSummary>> {
        self.with_conn(|conn| {
            let sql = format!(
                r#"
                SELECT {} FROM emails
                WHERE account_id = ?1 AND from_email = ?2 COLLATE NOCASE AND {}
                ORDER BY date DESC, id DESC
                LIMIT ?3
                "#,
                select_list(SUMMARY_COLUMNS, None),
                ACTIVE
            );
            let mut stmt = conn.prepare(&sql)?;
            let emails = stmt
                .query_map(params![account_id, from_email, limit as i64], summary_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(emails)
        })
    }

    /// Fetch several emails by id, newest first. Unknown ids are skipped.
    pub fn get_emails_by_ids(&self, ids: &[i64]) -> Result<Vec<EmailSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM emails WHERE id IN ({}) ORDER BY date DESC, id DESC",
                select_list(SUMMARY_COLUMNS, None),
                placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let values = ids.iter().map(|id| Value::Integer(*id));
            let emails = stmt
                .query_map(params_from_iter(values), summary_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(emails)
        })
    }

    /// Visible emails in the account, or in one folder.
    pub fn count_emails(&self, account_id: i64, folder_id: Option<i64>) -> Result<usize> {
        self.count_where(account_id, folder_id, ACTIVE)
    }

    pub fn count_unread(&self, account_id: i64, folder_id: Option<i64>) -> Result<usize> {
        self.count_where(account_id, folder_id, &format!("{} AND is_read = 0", ACTIVE))
    }

    fn count_where(
        &self,
        account_id: i64,
        folder_id: Option<i64>,
        predicate: &str,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM emails \
                 WHERE account_id = ?1 AND (?2 IS NULL OR folder_id = ?2) AND {}",
                predicate
            );
            let count: i64 =
                conn.query_row(&sql, params![account_id, folder_id], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    pub fn set_read(&self, id: i64, is_read: bool) -> Result<bool> {
        self.with_conn(|conn| set_flag(conn, id, "is_read", is_read))
    }

    pub fn set_starred(&self, id: i64, is_starred: bool) -> Result<bool> {
        self.with_conn(|conn| set_flag(conn, id, "is_starred", is_starred))
    }

    pub fn set_archived(&self, id: i64, is_archived: bool) -> Result<bool> {
        self.with_conn(|conn| set_flag(conn, id, "is_archived", is_archived))
    }

    pub fn set_replied(&self, id: i64, is_replied: bool) -> Result<bool> {
        self.with_conn(|conn| set_flag(conn, id, "is_replied", is_replied))
    }

    /// Logically delete an email. Idempotent; returns whether the row exists.
    pub fn tombstone(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| set_flag(conn, id, "is_deleted", true))
    }

    /// UIDs of the folder's emails that are not tombstoned.
    pub fn local_uids(&self, account_id: i64, folder_id: i64) -> Result<Vec<u32>> {
        self.uids_where(account_id, folder_id, "is_deleted = 0")
    }

    /// Every UID cached for the folder, tombstones included.
    pub fn cached_uids(&self, account_id: i64, folder_id: i64) -> Result<Vec<u32>> {
        self.uids_where(account_id, folder_id, "1 = 1")
    }

    fn uids_where(&self, account_id: i64, folder_id: i64, predicate: &str) -> Result<Vec<u32>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT uid FROM emails WHERE account_id = ?1 AND folder_id = ?2 AND {} ORDER BY uid",
                predicate
            ))?;
            let uids = stmt
                .query_map(params![account_id, folder_id], |row| row.get(0))?
                .collect::<Result<Vec<u32>, _>>()?;
            Ok(uids)
        })
    }

    /// Local archive and delete actions the server has not seen yet.
    ///
    /// A deleted row is reported only as deleted, even if it was also
    /// archived. Server-side deletes are idempotent, so rows tombstoned by
    /// a purge may show up here harmlessly.
    pub fn list_emails_to_sync(&self, account_id: i64, folder_id: i64) -> Result<ServerChanges> {
        self.with_conn(|conn| {
            let select = |predicate: &str| -> Result<Vec<Email>> {
                let sql = format!(
                    "SELECT {} FROM emails WHERE account_id = ?1 AND folder_id = ?2 AND {} \
                     ORDER BY uid",
                    select_list(EMAIL_COLUMNS, None),
                    predicate
                );
                let mut stmt = conn.prepare(&sql)?;
                let emails = stmt
                    .query_map(params![account_id, folder_id], email_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(emails)
            };
            Ok(ServerChanges {
                archived: select("is_archived = 1 AND is_deleted = 0")?,
                deleted: select("is_deleted = 1")?,
            })
        })
    }

    /// Highest UID cached for the folder, tombstones included.
    pub fn max_uid(&self, account_id: i64, folder_id: i64) -> Result<Option<u32>> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT MAX(uid) FROM emails WHERE account_id = ?1 AND folder_id = ?2",
                params![account_id, folder_id],
                |row| row.get(0),
            )?)
        })
    }
}
