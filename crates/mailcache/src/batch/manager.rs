//! Two-phase bulk operations
//!
//! `prepare` snapshots the matching ids and a preview, `confirm` commits to
//! proceed, `execute` applies the operation to the snapshot. Nothing touches
//! email rows before `execute`.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::error::{StateError, ValidationError};
use crate::models::{BatchFilter, BatchOpStatus, BatchOperation, EmailPreview, PendingBatchOp};
use crate::search::escape_like;
use crate::storage::{PersistentStore, set_flag};
use crate::storage::codec::{
    decode_list, decode_list_lossy, encode_list, now_ts, ts, ts_col, ts_col_opt,
};

const OP_COLUMNS: &str = "id, account_id, operation, description, filter_query, email_ids, \
     email_count, preview_data, status, created_at, executed_at";

fn op_from_row(row: &Row<'_>) -> Result<PendingBatchOp> {
    let operation: String = row.get(2)?;
    let status: String = row.get(8)?;
    let email_ids: String = row.get(5)?;
    let preview: Option<String> = row.get(7)?;

    Ok(PendingBatchOp {
        id: row.get(0)?,
        account_id: row.get(1)?,
        operation: operation.parse()?,
        description: row.get(3)?,
        filter_query: row.get(4)?,
        email_ids: decode_list(&email_ids)?,
        email_count: row.get::<_, i64>(6)? as usize,
        preview: decode_list_lossy(preview.as_deref(), "preview_data"),
        status: status.parse()?,
        created_at: ts_col(row, 9)?,
        executed_at: ts_col_opt(row, 10)?,
    })
}

fn load_op(conn: &Connection, id: i64) -> Result<Option<PendingBatchOp>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM pending_batch_ops WHERE id = ?1",
        OP_COLUMNS
    ))?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(op_from_row(row)?)),
        None => Ok(None),
    }
}

/// Guarded status change; fails with [`StateError::BatchOp`] when the
/// current status is not one of `from`.
fn transition_on(
    conn: &Connection,
    id: i64,
    action: &'static str,
    from: &[BatchOpStatus],
    to: BatchOpStatus,
) -> Result<PendingBatchOp> {
    let allowed = from
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let n = conn.execute(
        &format!(
            r#"
            UPDATE pending_batch_ops SET
                status = ?1,
                executed_at = CASE WHEN ?1 = 'executed' THEN ?2 ELSE executed_at END
            WHERE id = ?3 AND status IN ({})
            "#,
            allowed
        ),
        params![to.as_str(), now_ts(), id],
    )?;

    let op = load_op(conn, id)?.ok_or_else(|| anyhow!("Batch operation {} not found", id))?;
    if n == 0 {
        return Err(StateError::BatchOp {
            id,
            status: op.status.to_string(),
            action,
        }
        .into());
    }
    Ok(op)
}

fn apply_on(conn: &Connection, operation: BatchOperation, email_id: i64) -> Result<bool> {
    match operation {
        BatchOperation::Archive => set_flag(conn, email_id, "is_archived", true),
        BatchOperation::Delete => set_flag(conn, email_id, "is_deleted", true),
        BatchOperation::MarkRead => set_flag(conn, email_id, "is_read", true),
        BatchOperation::MarkUnread => set_flag(conn, email_id, "is_read", false),
    }
}

/// WHERE clause and parameters selecting the emails a filter matches.
fn filter_clause(account_id: i64, filter: &BatchFilter) -> (String, Vec<Value>) {
    let mut clause = vec![
        "account_id = ?".to_string(),
        "is_deleted = 0".to_string(),
        "is_archived = 0".to_string(),
    ];
    let mut values = vec![Value::Integer(account_id)];

    if let Some(from) = &filter.from {
        let pattern = format!("%{}%", escape_like(from));
        clause.push("(from_email LIKE ? ESCAPE '\\' OR from_name LIKE ? ESCAPE '\\')".to_string());
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }
    if let Some(folder_id) = filter.folder_id {
        clause.push("folder_id = ?".to_string());
        values.push(Value::Integer(folder_id));
    }
    if let Some(subject) = &filter.subject {
        clause.push("subject LIKE ? ESCAPE '\\'".to_string());
        values.push(Value::Text(format!("%{}%", escape_like(subject))));
    }
    if filter.unread_only {
        clause.push("is_read = 0".to_string());
    }
    if let Some(before) = filter.older_than {
        clause.push("date < ?".to_string());
        values.push(Value::Text(ts(&before)));
    }

    (clause.join(" AND "), values)
}

pub struct BatchOperationManager {
    store: Arc<PersistentStore>,
}

impl BatchOperationManager {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    /// Stage `operation` over the emails matching `filter`.
    ///
    /// At most `batch_preview_limit` emails (newest first) are captured.
    /// The id list and preview are stored as they are now and are not
    /// re-derived later.
    pub fn prepare(
        &self,
        account_id: i64,
        operation: BatchOperation,
        filter: &BatchFilter,
    ) -> Result<PendingBatchOp> {
        if filter.is_empty() {
            return Err(ValidationError::EmptyFilter.into());
        }

        let limit = self.store.config().batch_preview_limit.max(1);
        let (clause, mut values) = filter_clause(account_id, filter);
        values.push(Value::Integer(limit as i64));
        let filter_query = serde_json::to_string(filter).context("Failed to encode batch filter")?;

        let id = self.store.with_tx(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT id, subject, from_name, from_email, date FROM emails WHERE {} ORDER BY date DESC, id DESC LIMIT ?",
                clause
            ))?;
            let preview = stmt
                .query_map(params_from_iter(values.iter()), |row| {
                    Ok(EmailPreview {
                        id: row.get(0)?,
                        subject: row.get(1)?,
                        from_name: row.get(2)?,
                        from_email: row.get(3)?,
                        date: ts_col(row, 4)?
                            .format("%Y-%m-%d %H:%M")
                            .to_string(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            if preview.is_empty() {
                return Err(ValidationError::EmptySelection(filter.describe()).into());
            }

            let ids: Vec<i64> = preview.iter().map(|p| p.id).collect();
            let description = format!(
                "{} {} email{} {}",
                operation.verb(),
                ids.len(),
                if ids.len() == 1 { "" } else { "s" },
                filter.describe()
            );

            tx.execute(
                r#"
                INSERT INTO pending_batch_ops
                    (account_id, operation, description, filter_query, email_ids,
                     email_count, preview_data, status, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)
                "#,
                params![
                    account_id,
                    operation.as_str(),
                    description,
                    filter_query,
                    encode_list(&ids)?,
                    ids.len() as i64,
                    encode_list(&preview)?,
                    now_ts(),
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;

        let op = self
            .get(id)?
            .ok_or_else(|| anyhow!("Batch operation {} vanished after insert", id))?;
        log::info!("[BATCH] Prepared {}: {}", op.id, op.description);
        Ok(op)
    }

    pub fn get(&self, id: i64) -> Result<Option<PendingBatchOp>> {
        self.store.with_conn(|conn| load_op(conn, id))
    }

    /// Operations still awaiting execution (pending or confirmed), newest first.
    pub fn list_pending(&self, account_id: i64) -> Result<Vec<PendingBatchOp>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT {} FROM pending_batch_ops
                WHERE account_id = ?1 AND status IN ('pending', 'confirmed')
                ORDER BY created_at DESC, id DESC
                "#,
                OP_COLUMNS
            ))?;
            let mut rows = stmt.query([account_id])?;
            let mut ops = Vec::new();
            while let Some(row) = rows.next()? {
                ops.push(op_from_row(row)?);
            }
            Ok(ops)
        })
    }

    pub fn count_pending(&self, account_id: i64) -> Result<usize> {
        self.store.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pending_batch_ops WHERE account_id = ?1 AND status IN ('pending', 'confirmed')",
                [account_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Move `id` to `to` if its status is one of `from`.
    fn transition(
        &self,
        id: i64,
        action: &'static str,
        from: &[BatchOpStatus],
        to: BatchOpStatus,
    ) -> Result<PendingBatchOp> {
        self.store
            .with_tx(|tx| transition_on(tx, id, action, from, to))
    }

    /// `pending` → `confirmed`. No email is touched.
    pub fn confirm(&self, id: i64) -> Result<PendingBatchOp> {
        self.transition(id, "confirm", &[BatchOpStatus::Pending], BatchOpStatus::Confirmed)
    }

    /// `pending` → `cancelled`.
    pub fn cancel(&self, id: i64) -> Result<PendingBatchOp> {
        let op = self.transition(
            id,
            "cancel",
            &[BatchOpStatus::Pending],
            BatchOpStatus::Cancelled,
        )?;
        log::info!("[BATCH] Cancelled {}", id);
        Ok(op)
    }

    /// Claim the record as executed, then apply the operation to every
    /// snapshotted id in the same transaction. A cancel that loses the
    /// race finds the record already executed; one that wins leaves every
    /// email untouched. Items that fail or no longer exist are skipped;
    /// returns the number that succeeded.
    pub fn execute(&self, id: i64) -> Result<usize> {
        let (op, succeeded) = self.store.with_tx(|tx| {
            let op = transition_on(
                tx,
                id,
                "execute",
                &[BatchOpStatus::Pending, BatchOpStatus::Confirmed],
                BatchOpStatus::Executed,
            )?;

            let mut succeeded = 0;
            for &email_id in &op.email_ids {
                match apply_on(tx, op.operation, email_id) {
                    Ok(true) => succeeded += 1,
                    Ok(false) => log::debug!("[BATCH] Email {} no longer exists", email_id),
                    Err(e) => log::warn!(
                        "[BATCH] {} failed for email {}: {:#}",
                        op.operation,
                        email_id,
                        e
                    ),
                }
            }
            Ok((op, succeeded))
        })?;

        log::info!(
            "[BATCH] Executed {}: {}/{} succeeded",
            id,
            succeeded,
            op.email_ids.len()
        );
        Ok(succeeded)
    }

    /// Remove the record outright. Developer cleanup only.
    pub fn delete(&self, id: i64) -> Result<bool> {
        self.store.with_conn(|conn| {
            let n = conn.execute("DELETE FROM pending_batch_ops WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    /// Status without decoding the id list
    pub fn status(&self, id: i64) -> Result<Option<BatchOpStatus>> {
        self.store.with_conn(|conn| {
            let status: Option<String> = conn
                .query_row("SELECT status FROM pending_batch_ops WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(status.map(|s| s.parse::<BatchOpStatus>()).transpose()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::state_error;
    use crate::models::EmailAddress;
    use crate::storage::create_test_store;
    use crate::sync::SyncReconciler;
    use crate::sync::fake::envelope;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        store: Arc<PersistentStore>,
        sync: SyncReconciler,
        batch: BatchOperationManager,
        account: i64,
        inbox: i64,
    }

    fn fixture(store: PersistentStore) -> Fixture {
        let account = store.get_or_create_account("me@x.com", None).unwrap().id;
        let inbox = store.get_or_create_folder(account, "INBOX").unwrap().id;
        let store = Arc::new(store);
        Fixture {
            sync: SyncReconciler::new(store.clone()),
            batch: BatchOperationManager::new(store.clone()),
            store,
            account,
            inbox,
        }
    }

    /// Three newsletters (uids 1-3) and one personal email (uid 4)
    fn seed(f: &Fixture) {
        for uid in 1..=3 {
            f.sync
                .upsert(
                    f.account,
                    f.inbox,
                    &envelope(uid)
                        .from(EmailAddress::with_name("Shop", "news@shop.com"))
                        .subject(format!("Deal {}", uid))
                        .build(),
                )
                .unwrap();
        }
        f.sync
            .upsert(f.account, f.inbox, &envelope(4).read(true).build())
            .unwrap();
    }

    fn validation(err: &anyhow::Error) -> Option<&ValidationError> {
        err.downcast_ref::<ValidationError>()
    }

    #[test]
    fn test_prepare_snapshots_selection() {
        let (store, _dir) = create_test_store();
        let f = fixture(store);
        seed(&f);

        let op = f
            .batch
            .prepare(f.account, BatchOperation::Archive, &BatchFilter::from_sender("news@shop.com"))
            .unwrap();
        assert_eq!(op.status, BatchOpStatus::Pending);
        assert_eq!(op.description, "Archive 3 emails from 'news@shop.com'");
        assert_eq!(op.email_count, 3);
        assert_eq!(op.preview.len(), 3);
        assert_eq!(op.preview[0].subject, "Deal 3");
        assert_eq!(op.preview[0].date, "2024-01-01 00:03");
        assert_eq!(op.preview[0].from_name.as_deref(), Some("Shop"));

        // Nothing is touched before execution
        assert_eq!(f.store.count_emails(f.account, None).unwrap(), 4);

        // Later changes do not alter the stored preview
        f.sync
            .upsert(
                f.account,
                f.inbox,
                &envelope(3)
                    .from(EmailAddress::new("news@shop.com"))
                    .subject("Changed")
                    .build(),
            )
            .unwrap();
        let again = f.batch.get(op.id).unwrap().unwrap();
        assert_eq!(again.preview[0].subject, "Deal 3");
        assert_eq!(again.email_ids, op.email_ids);
    }

    #[test]
    fn test_prepare_rejects_empty_filter_and_selection() {
        let (store, _dir) = create_test_store();
        let f = fixture(store);
        seed(&f);

        let err = f
            .batch
            .prepare(f.account, BatchOperation::Delete, &BatchFilter::default())
            .unwrap_err();
        assert_eq!(validation(&err), Some(&ValidationError::EmptyFilter));

        let err = f
            .batch
            .prepare(f.account, BatchOperation::Delete, &BatchFilter::from_sender("nobody@x.com"))
            .unwrap_err();
        assert!(matches!(validation(&err), Some(ValidationError::EmptySelection(_))));
        assert_eq!(f.batch.count_pending(f.account).unwrap(), 0);
    }

    #[test]
    fn test_combined_filter_criteria() {
        let (store, _dir) = create_test_store();
        let f = fixture(store);
        seed(&f);
        f.store
            .set_read(f.store.get_email_by_uid(f.account, f.inbox, 1).unwrap().unwrap().id, true)
            .unwrap();

        let filter = BatchFilter {
            unread_only: true,
            older_than: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 3, 0).unwrap()),
            ..Default::default()
        };
        let op = f.batch.prepare(f.account, BatchOperation::MarkRead, &filter).unwrap();
        // uid 1 is read, uids 3 and 4 are not older than 00:03
        let uids: Vec<&str> = op.preview.iter().map(|p| p.subject.as_str()).collect();
        assert_eq!(uids, vec!["Deal 2"]);
        assert_eq!(op.description, "Mark as read 1 email unread older than 2024-01-01");

        let subject = BatchFilter {
            subject: Some("deal".to_string()),
            folder_id: Some(f.inbox),
            ..Default::default()
        };
        assert_eq!(
            f.batch
                .prepare(f.account, BatchOperation::Delete, &subject)
                .unwrap()
                .email_count,
            3
        );
    }

    #[test]
    fn test_preview_limit_bounds_selection() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = crate::StoreConfig {
            batch_preview_limit: 2,
            ..Default::default()
        };
        let f = fixture(PersistentStore::open(dir.path().join("m.sqlite"), &config).unwrap());
        seed(&f);
        let op = f
            .batch
            .prepare(f.account, BatchOperation::Archive, &BatchFilter::from_sender("shop"))
            .unwrap();
        assert_eq!(op.email_count, 2);
        assert_eq!(op.email_ids.len(), 2);
    }

    #[test]
    fn test_confirm_then_execute() {
        let (store, _dir) = create_test_store();
        let f = fixture(store);
        seed(&f);

        let op = f
            .batch
            .prepare(f.account, BatchOperation::Archive, &BatchFilter::from_sender("news@shop.com"))
            .unwrap();
        let confirmed = f.batch.confirm(op.id).unwrap();
        assert_eq!(confirmed.status, BatchOpStatus::Confirmed);
        assert_eq!(f.store.count_emails(f.account, None).unwrap(), 4);

        assert_eq!(f.batch.execute(op.id).unwrap(), 3);
        let done = f.batch.get(op.id).unwrap().unwrap();
        assert_eq!(done.status, BatchOpStatus::Executed);
        assert!(done.executed_at.is_some());
        assert_eq!(f.store.count_emails(f.account, None).unwrap(), 1);
        assert_eq!(f.batch.count_pending(f.account).unwrap(), 0);

        let err = f.batch.execute(op.id).unwrap_err();
        assert!(matches!(
            state_error(&err),
            Some(StateError::BatchOp { action: "execute", .. })
        ));
        assert!(f.batch.cancel(op.id).is_err());
    }

    #[test]
    fn test_cancelled_op_cannot_execute() {
        let (store, _dir) = create_test_store();
        let f = fixture(store);
        seed(&f);

        let op = f
            .batch
            .prepare(f.account, BatchOperation::Delete, &BatchFilter::from_sender("news@shop.com"))
            .unwrap();
        assert_eq!(f.batch.cancel(op.id).unwrap().status, BatchOpStatus::Cancelled);

        let err = f.batch.execute(op.id).unwrap_err();
        assert_eq!(
            state_error(&err),
            Some(&StateError::BatchOp {
                id: op.id,
                status: "cancelled".to_string(),
                action: "execute",
            })
        );
        assert!(f.batch.confirm(op.id).is_err());
        assert_eq!(f.store.count_emails(f.account, None).unwrap(), 4);
    }

    #[test]
    fn test_cancel_racing_execute_cannot_strand_emails() {
        let (store, _dir) = create_test_store();
        let f = fixture(store);
        seed(&f);

        let op = f
            .batch
            .prepare(f.account, BatchOperation::Archive, &BatchFilter::from_sender("news@shop.com"))
            .unwrap();
        // A cancel that fires as soon as the first email is touched
        f.store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER cancel_mid_execute AFTER UPDATE OF is_archived ON emails
                     BEGIN
                         UPDATE pending_batch_ops SET status = 'cancelled'
                         WHERE status = 'pending';
                     END;",
                )?;
                Ok(())
            })
            .unwrap();

        assert_eq!(f.batch.execute(op.id).unwrap(), 3);
        assert_eq!(f.batch.status(op.id).unwrap(), Some(BatchOpStatus::Executed));
        assert_eq!(f.store.count_emails(f.account, None).unwrap(), 1);
        assert!(f.batch.cancel(op.id).is_err());
    }

    #[test]
    fn test_failed_claim_touches_nothing() {
        let (store, _dir) = create_test_store();
        let f = fixture(store);
        seed(&f);

        let filter = BatchFilter::from_sender("news@shop.com");
        let op = f
            .batch
            .prepare(f.account, BatchOperation::MarkRead, &filter)
            .unwrap();
        f.batch.cancel(op.id).unwrap();
        assert!(f.batch.execute(op.id).is_err());
        assert_eq!(f.store.count_unread(f.account, None).unwrap(), 3);
        assert_eq!(f.batch.status(op.id).unwrap(), Some(BatchOpStatus::Cancelled));
    }

    #[test]
    fn test_execute_from_pending_counts_only_successes() {
        let (store, _dir) = create_test_store();
        let f = fixture(store);
        seed(&f);

        let filter = BatchFilter::from_sender("news@shop.com");
        let op = f
            .batch
            .prepare(f.account, BatchOperation::MarkRead, &filter)
            .unwrap();
        // One target disappears between prepare and execute
        f.store
            .with_conn(|conn| {
                conn.execute("DELETE FROM emails WHERE id = ?1", [op.email_ids[0]])?;
                Ok(())
            })
            .unwrap();

        assert_eq!(f.batch.execute(op.id).unwrap(), 2);
        assert_eq!(f.store.count_unread(f.account, None).unwrap(), 0);
        assert_eq!(f.batch.status(op.id).unwrap(), Some(BatchOpStatus::Executed));
    }

    #[test]
    fn test_list_pending_and_delete() {
        let (store, _dir) = create_test_store();
        let f = fixture(store);
        seed(&f);

        let a = f
            .batch
            .prepare(f.account, BatchOperation::MarkUnread, &BatchFilter::from_sender("shop"))
            .unwrap();
        let b = f
            .batch
            .prepare(f.account, BatchOperation::Delete, &BatchFilter::from_sender("sender@"))
            .unwrap();
        f.batch.confirm(b.id).unwrap();

        let pending = f.batch.list_pending(f.account).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, b.id);

        assert!(f.batch.delete(a.id).unwrap());
        assert!(!f.batch.delete(a.id).unwrap());
        assert!(f.batch.get(a.id).unwrap().is_none());
        assert_eq!(f.batch.count_pending(f.account).unwrap(), 1);
        assert!(f.batch.execute(a.id).is_err());
    }
}
