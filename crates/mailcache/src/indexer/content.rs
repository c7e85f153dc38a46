//! Resumable backfill of searchable body text
//!
//! Emails synced as envelopes only have no body text, so search cannot see
//! their content. The indexer fetches bodies a batch at a time, writes them
//! through the search triggers, and keeps its progress in
//! `content_index_state` so a paused or interrupted run picks up where it
//! stopped.
//!
//! ```text
//! idle ──start──▶ running ──pause──▶ paused ──resume──▶ running
//!                    │
//!                    └──complete──▶ completed ──start──▶ running
//! any ──fail──▶ error ──start──▶ running
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::StateError;
use crate::models::{ContentIndexState, IndexStatus};
use crate::storage::PersistentStore;
use crate::storage::codec::{now_ts, ts_col, ts_col_opt};
use crate::sync::Fetcher;

/// Allowed throughput range, items per minute
pub const SPEED_RANGE: std::ops::RangeInclusive<u32> = 1..=10_000;

/// An email waiting for its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCandidate {
    pub email_id: i64,
    pub uid: u32,
    pub folder_id: i64,
    pub folder_name: String,
}

/// Outcome of one [`ContentIndexer::run_batch`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBatchReport {
    pub status: IndexStatus,
    /// Emails marked indexed in this batch
    pub processed: usize,
    /// Of those, how many had non-empty body text
    pub with_body: usize,
    pub remaining: usize,
    /// Resumption cursor after this batch
    pub last_indexed_uid: Option<u32>,
}

pub struct ContentIndexer {
    store: Arc<PersistentStore>,
}

const STATE_COLUMNS: &str = "account_id, status, total_emails, indexed_emails, last_indexed_uid, \
     speed, last_error, started_at, paused_at, completed_at, updated_at";

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<ContentIndexState> {
    let status: String = row.get(1)?;
    let status = status.parse::<IndexStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ContentIndexState {
        account_id: row.get(0)?,
        status,
        total_emails: row.get::<_, i64>(2)? as u64,
        indexed_emails: row.get::<_, i64>(3)? as u64,
        last_indexed_uid: row.get(4)?,
        speed: row.get(5)?,
        last_error: row.get(6)?,
        started_at: ts_col_opt(row, 7)?,
        paused_at: ts_col_opt(row, 8)?,
        completed_at: ts_col_opt(row, 9)?,
        updated_at: ts_col(row, 10)?,
    })
}

/// Load the account's state row, inserting a default one if absent.
fn ensure_state(
    conn: &Connection,
    account_id: i64,
    default_speed: u32,
) -> Result<ContentIndexState> {
    let now = now_ts();
    conn.execute(
        r#"
        INSERT INTO content_index_state (account_id, speed, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?3)
        ON CONFLICT(account_id) DO NOTHING
        "#,
        params![account_id, default_speed, now],
    )?;
    let state = conn.query_row(
        &format!("SELECT {} FROM content_index_state WHERE account_id = ?1", STATE_COLUMNS),
        [account_id],
        state_from_row,
    )?;
    Ok(state)
}

fn count_unindexed(conn: &Connection, account_id: i64) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM emails \
         WHERE account_id = ?1 AND body_indexed = 0 AND is_deleted = 0",
        [account_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

impl ContentIndexer {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    fn default_speed(&self) -> u32 {
        self.store
            .config()
            .indexer_default_speed
            .clamp(*SPEED_RANGE.start(), *SPEED_RANGE.end())
    }

    /// Current state, created as `idle` on first access.
    pub fn state(&self, account_id: i64) -> Result<ContentIndexState> {
        let speed = self.default_speed();
        self.store
            .with_tx(|tx| ensure_state(tx, account_id, speed))
    }

    /// Check the current status against `allowed`, then run `apply`.
    fn transition(
        &self,
        account_id: i64,
        action: &'static str,
        allowed: &[IndexStatus],
        apply: impl FnOnce(&Connection) -> Result<()>,
    ) -> Result<ContentIndexState> {
        let speed = self.default_speed();
        let state = self.store.with_tx(|tx| {
            let current = ensure_state(tx, account_id, speed)?;
            if !allowed.contains(&current.status) {
                return Err(StateError::Indexer {
                    account_id,
                    status: current.status.to_string(),
                    action,
                }
                .into());
            }
            apply(tx)?;
            ensure_state(tx, account_id, speed)
        })?;
        log::info!("[INDEXER] Account {}: {} -> {}", account_id, action, state.status);
        Ok(state)
    }

    /// Begin a run over every email still lacking body text.
    pub fn start(&self, account_id: i64) -> Result<ContentIndexState> {
        self.transition(
            account_id,
            "start",
            &[IndexStatus::Idle, IndexStatus::Completed, IndexStatus::Error],
            |conn| {
                let total = count_unindexed(conn, account_id)?;
                conn.execute(
                    r#"
                    UPDATE content_index_state SET
                        status = 'running', total_emails = ?1, indexed_emails = 0,
                        started_at = ?2, paused_at = NULL, completed_at = NULL,
                        last_error = NULL, updated_at = ?2
                    WHERE account_id = ?3
                    "#,
                    params![total as i64, now_ts(), account_id],
                )?;
                Ok(())
            },
        )
    }

    pub fn pause(&self, account_id: i64) -> Result<ContentIndexState> {
        self.transition(account_id, "pause", &[IndexStatus::Running], |conn| {
            conn.execute(
                "UPDATE content_index_state SET status = 'paused', paused_at = ?1, updated_at = ?1 \
                 WHERE account_id = ?2",
                params![now_ts(), account_id],
            )?;
            Ok(())
        })
    }

    pub fn resume(&self, account_id: i64) -> Result<ContentIndexState> {
        self.transition(account_id, "resume", &[IndexStatus::Paused], |conn| {
            conn.execute(
                "UPDATE content_index_state SET status = 'running', paused_at = NULL, updated_at = ?1 \
                 WHERE account_id = ?2",
                params![now_ts(), account_id],
            )?;
            Ok(())
        })
    }

    pub fn complete(&self, account_id: i64) -> Result<ContentIndexState> {
        self.transition(account_id, "complete", &[IndexStatus::Running], |conn| {
            conn.execute(
                "UPDATE content_index_state SET status = 'completed', completed_at = ?1, \
                 updated_at = ?1 WHERE account_id = ?2",
                params![now_ts(), account_id],
            )?;
            Ok(())
        })
    }

    /// Record a fatal failure. Allowed from any state.
    pub fn fail(&self, account_id: i64, message: &str) -> Result<ContentIndexState> {
        self.transition(
            account_id,
            "fail",
            &[
                IndexStatus::Idle,
                IndexStatus::Running,
                IndexStatus::Paused,
                IndexStatus::Completed,
                IndexStatus::Error,
            ],
            |conn| {
                conn.execute(
                    "UPDATE content_index_state SET status = 'error', last_error = ?1, \
                     updated_at = ?2 WHERE account_id = ?3",
                    params![message, now_ts(), account_id],
                )?;
                Ok(())
            },
        )
    }

    /// Set throughput in items per minute, clamped to [`SPEED_RANGE`].
    pub fn set_speed(&self, account_id: i64, items_per_minute: u32) -> Result<ContentIndexState> {
        let speed = items_per_minute.clamp(*SPEED_RANGE.start(), *SPEED_RANGE.end());
        let default_speed = self.default_speed();
        self.store.with_tx(|tx| {
            ensure_state(tx, account_id, default_speed)?;
            tx.execute(
                "UPDATE content_index_state SET speed = ?1, updated_at = ?2 WHERE account_id = ?3",
                params![speed, now_ts(), account_id],
            )?;
            ensure_state(tx, account_id, default_speed)
        })
    }

    /// Add `processed` to the counter and move the cursor. Allowed while
    /// running or paused, since a pause can land in the middle of a batch.
    pub fn record_progress(
        &self,
        account_id: i64,
        processed: usize,
        last_uid: Option<u32>,
    ) -> Result<ContentIndexState> {
        let speed = self.default_speed();
        self.store.with_tx(|tx| {
            let current = ensure_state(tx, account_id, speed)?;
            if !matches!(current.status, IndexStatus::Running | IndexStatus::Paused) {
                return Err(StateError::Indexer {
                    account_id,
                    status: current.status.to_string(),
                    action: "record progress",
                }
                .into());
            }
            tx.execute(
                r#"
                UPDATE content_index_state SET
                    indexed_emails = indexed_emails + ?1,
                    last_indexed_uid = COALESCE(?2, last_indexed_uid),
                    updated_at = ?3
                WHERE account_id = ?4
                "#,
                params![processed as i64, last_uid, now_ts(), account_id],
            )?;
            ensure_state(tx, account_id, speed)
        })
    }

    /// Unindexed, non-deleted emails, newest first.
    pub fn get_batch_to_index(&self, account_id: i64, limit: usize) -> Result<Vec<IndexCandidate>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT e.id, e.uid, e.folder_id, f.name FROM emails e
                JOIN folders f ON f.id = e.folder_id
                WHERE e.account_id = ?1 AND e.body_indexed = 0 AND e.is_deleted = 0
                ORDER BY e.date DESC, e.id DESC
                LIMIT ?2
                "#,
            )?;
            let batch = stmt
                .query_map(params![account_id, limit as i64], |row| {
                    Ok(IndexCandidate {
                        email_id: row.get(0)?,
                        uid: row.get(1)?,
                        folder_id: row.get(2)?,
                        folder_name: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(batch)
        })
    }

    /// Store body text and flag the email indexed. The search mirror is
    /// updated by trigger in the same statement. Returns false if the
    /// email does not exist.
    pub fn mark_indexed(&self, email_id: i64, body_text: &str) -> Result<bool> {
        self.store.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE emails SET body_text = ?1, body_indexed = 1, updated_at = ?2 WHERE id = ?3",
                params![body_text, now_ts(), email_id],
            )?;
            Ok(n > 0)
        })
    }

    pub fn count_remaining(&self, account_id: i64) -> Result<usize> {
        self.store.with_conn(|conn| count_unindexed(conn, account_id))
    }

    pub fn count_indexed(&self, account_id: i64) -> Result<usize> {
        self.store.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM emails \
                 WHERE account_id = ?1 AND body_indexed = 1 AND is_deleted = 0",
                [account_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Index one batch if the indexer is running.
    ///
    /// Bodies come from `fetcher`; a message without a text body is still
    /// marked indexed (with empty text) so it is not retried. The status is
    /// re-read before each item, so a `pause` issued mid-batch stops the
    /// loop and the work done so far is still recorded. A fetch error
    /// moves the indexer to `error` and is returned. When nothing is left
    /// the run completes. Callers pace successive calls with
    /// [`ContentIndexState::item_interval`].
    pub fn run_batch(&self, fetcher: &dyn Fetcher, account_id: i64) -> Result<IndexBatchReport> {
        let state = self.state(account_id)?;
        if state.status != IndexStatus::Running {
            return Ok(IndexBatchReport {
                status: state.status,
                processed: 0,
                with_body: 0,
                remaining: self.count_remaining(account_id)?,
                last_indexed_uid: state.last_indexed_uid,
            });
        }
        if let Some(uid) = state.last_indexed_uid {
            log::debug!(
                "[INDEXER] Account {}: continuing after uid {} ({} indexed)",
                account_id,
                uid,
                state.indexed_emails
            );
        }

        let limit = self.store.config().indexer_batch_size.max(1);
        let batch = self.get_batch_to_index(account_id, limit)?;
        let mut processed = 0;
        let mut with_body = 0;
        let mut last_uid = None;

        for candidate in &batch {
            if self.state(account_id)?.status != IndexStatus::Running {
                log::info!("[INDEXER] Account {}: stopped mid-batch", account_id);
                break;
            }
            let body = match fetcher.fetch_body_text(&candidate.folder_name, candidate.uid) {
                Ok(body) => body.unwrap_or_default(),
                Err(e) => {
                    self.record_progress(account_id, processed, last_uid)?;
                    let message = format!("{:#}", e);
                    self.fail(account_id, &message)?;
                    log::error!("[INDEXER] Account {} failed: {}", account_id, message);
                    return Err(e).with_context(|| {
                        format!("Failed to fetch body for email {}", candidate.email_id)
                    });
                }
            };
            if self.mark_indexed(candidate.email_id, &body)? {
                processed += 1;
                if !body.is_empty() {
                    with_body += 1;
                }
            }
            last_uid = Some(candidate.uid);
        }

        let state = self.record_progress(account_id, processed, last_uid)?;
        let remaining = self.count_remaining(account_id)?;
        let status = if state.status == IndexStatus::Running && remaining == 0 {
            self.complete(account_id)?.status
        } else {
            state.status
        };
        log::debug!(
            "[INDEXER] Account {}: batch of {} done, {} remaining",
            account_id,
            processed,
            remaining
        );

        Ok(IndexBatchReport {
            status,
            processed,
            with_body,
            remaining,
            last_indexed_uid: state.last_indexed_uid,
        })
    }

    /// Last error recorded for the account, if the indexer is in `error`.
    pub fn last_error(&self, account_id: i64) -> Result<Option<String>> {
        self.store.with_conn(|conn| {
            let err: Option<Option<String>> = conn
                .query_row(
                    "SELECT last_error FROM content_index_state \
                     WHERE account_id = ?1 AND status = 'error'",
                    [account_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(err.flatten())
        })
    }
}
