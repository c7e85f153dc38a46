//! Local/remote reconciliation
//!
//! Upserts fetched envelopes by natural key (account, folder, uid) and
//! tombstones local rows whose UIDs are no longer on the server.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use rusqlite::{Connection, params};

use super::Fetcher;
use crate::models::{Folder, NewEmail};
use crate::storage::PersistentStore;
use crate::storage::codec::{compress_text, encode_list, now_ts, ts};
use crate::threads::ThreadDetector;

/// Statistics from a sync operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Envelopes received from the fetcher
    pub fetched: usize,
    /// Envelopes written (new or updated)
    pub stored: usize,
    /// Envelopes that could not be written
    pub failed: usize,
    /// Local rows tombstoned because the server no longer has them
    pub purged: usize,
    /// Rows that received a locally derived thread id
    pub threaded: usize,
    pub duration_ms: u64,
}

/// Options for [`SyncReconciler::sync_folder`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Newest UIDs fetched per run; older ones wait for the next run
    pub max_new: usize,
    /// UIDs requested from the fetcher per call
    pub fetch_chunk: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_new: 500,
            fetch_chunk: 100,
        }
    }
}

const UPSERT_SQL: &str = r#"
    INSERT INTO emails (
        account_id, folder_id, uid, message_id, subject, from_name, from_email,
        to_addresses, cc_addresses, date, is_read, is_starred, is_deleted,
        has_attachments, snippet, body_text, body_html, raw_headers, size,
        in_reply_to, "references", thread_id, thread_synced_at, body_indexed,
        created_at, updated_at
    ) VALUES (
        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
        ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?25
    )
    ON CONFLICT(account_id, folder_id, uid) DO UPDATE SET
        subject = excluded.subject,
        from_name = excluded.from_name,
        from_email = excluded.from_email,
        to_addresses = excluded.to_addresses,
        cc_addresses = excluded.cc_addresses,
        date = excluded.date,
        is_read = excluded.is_read,
        is_starred = excluded.is_starred,
        is_deleted = excluded.is_deleted,
        has_attachments = excluded.has_attachments,
        snippet = excluded.snippet,
        body_text = COALESCE(excluded.body_text, emails.body_text),
        body_html = COALESCE(excluded.body_html, emails.body_html),
        body_indexed = MAX(emails.body_indexed, excluded.body_indexed),
        raw_headers = COALESCE(excluded.raw_headers, emails.raw_headers),
        size = excluded.size,
        message_id = COALESCE(emails.message_id, excluded.message_id),
        in_reply_to = COALESCE(emails.in_reply_to, excluded.in_reply_to),
        "references" = COALESCE(emails."references", excluded."references"),
        thread_id = CASE WHEN excluded.thread_synced_at IS NOT NULL
                         THEN excluded.thread_id ELSE emails.thread_id END,
        thread_synced_at = COALESCE(excluded.thread_synced_at, emails.thread_synced_at),
        updated_at = excluded.updated_at
    RETURNING id
"#;

fn upsert_on(conn: &Connection, account_id: i64, folder_id: i64, email: &NewEmail) -> Result<i64> {
    let now = now_ts();
    let body_html = email.body_html.as_deref().map(compress_text).transpose()?;
    let thread_synced_at = email.remote_thread_id.as_ref().map(|_| now.clone());

    let id = conn.query_row(
        UPSERT_SQL,
        params![
            account_id,
            folder_id,
            email.uid,
            email.message_id,
            email.subject,
            email.from.name,
            email.from.email,
            encode_list(&email.to)?,
            encode_list(&email.cc)?,
            ts(&email.date),
            email.is_read as i64,
            email.is_starred as i64,
            email.is_deleted as i64,
            email.has_attachments as i64,
            email.snippet,
            email.body_text,
            body_html,
            email.raw_headers,
            email.size,
            email.in_reply_to,
            email.references,
            email.remote_thread_id,
            thread_synced_at,
            email.body_text.is_some() as i64,
            now,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub struct SyncReconciler {
    store: Arc<PersistentStore>,
    threads: ThreadDetector,
}

impl SyncReconciler {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self {
            threads: ThreadDetector::new(store.clone()),
            store,
        }
    }

    /// Insert an email, or update the mutable fields of the existing row
    /// with the same (account, folder, uid). Creation time is preserved.
    /// Flags, the deleted flag included, follow the envelope; `sync_folder`
    /// does not re-fetch tombstoned UIDs, so a local delete sticks there.
    /// Returns the row id.
    pub fn upsert(&self, account_id: i64, folder_id: i64, email: &NewEmail) -> Result<i64> {
        self.store
            .with_conn(|conn| upsert_on(conn, account_id, folder_id, email))
    }

    /// Upsert a batch in one transaction, continuing past rows that fail.
    pub fn upsert_batch(
        &self,
        account_id: i64,
        folder_id: i64,
        emails: &[NewEmail],
    ) -> Result<(SyncStats, Vec<i64>)> {
        let mut stats = SyncStats {
            fetched: emails.len(),
            ..Default::default()
        };
        let ids = self.store.with_tx(|tx| {
            let mut ids = Vec::with_capacity(emails.len());
            for email in emails {
                match upsert_on(tx, account_id, folder_id, email) {
                    Ok(id) => {
                        stats.stored += 1;
                        ids.push(id);
                    }
                    Err(e) => {
                        log::warn!("[SYNC] Failed to store uid {}: {:#}", email.uid, e);
                        stats.failed += 1;
                    }
                }
            }
            Ok(ids)
        })?;
        Ok((stats, ids))
    }

    /// Tombstone local emails whose UIDs are absent from the remote set.
    ///
    /// An absent or empty remote set means the listing is unknown (for
    /// example a failed fetch) and nothing is touched. Rows are processed
    /// in chunks of the configured size; a row that fails to update is
    /// logged and skipped. Returns the number of rows tombstoned.
    pub fn purge(
        &self,
        account_id: i64,
        folder_id: i64,
        remote_uids: Option<&[u32]>,
    ) -> Result<usize> {
        let Some(remote) = remote_uids.filter(|uids| !uids.is_empty()) else {
            log::info!(
                "[SYNC] Purge skipped for folder {}: remote UID list unknown",
                folder_id
            );
            return Ok(0);
        };

        let remote: HashSet<u32> = remote.iter().copied().collect();
        let stale: Vec<u32> = self
            .store
            .local_uids(account_id, folder_id)?
            .into_iter()
            .filter(|uid| !remote.contains(uid))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let chunk_size = self.store.config().purge_chunk_size.max(1);
        let mut purged = 0;
        for chunk in stale.chunks(chunk_size) {
            purged += self.store.with_tx(|tx| {
                let mut stmt = tx.prepare(
                    r#"
                    UPDATE emails SET is_deleted = 1, updated_at = ?1
                    WHERE account_id = ?2 AND folder_id = ?3 AND uid = ?4 AND is_deleted = 0
                    "#,
                )?;
                let now = now_ts();
                let mut n = 0;
                for uid in chunk {
                    match stmt.execute(params![now, account_id, folder_id, uid]) {
                        Ok(changed) => n += changed,
                        Err(e) => log::warn!("[SYNC] Failed to tombstone uid {}: {}", uid, e),
                    }
                }
                Ok(n)
            })?;
        }

        log::info!(
            "[SYNC] Purged {} email(s) from folder {} ({} remote UIDs)",
            purged,
            folder_id,
            remote.len()
        );
        Ok(purged)
    }

    /// Bring one folder in line with the server.
    ///
    /// Lists remote UIDs, fetches envelopes for the ones not cached, derives
    /// threads for new rows, purges rows gone from the server and refreshes
    /// the folder counts. The run is recorded in the sync log.
    pub fn sync_folder(
        &self,
        fetcher: &dyn Fetcher,
        account_id: i64,
        folder_name: &str,
        options: &SyncOptions,
    ) -> Result<SyncStats> {
        let start = Instant::now();
        let folder = self.store.get_or_create_folder(account_id, folder_name)?;
        let log_id = self.store.log_sync_start(account_id, Some(folder.id))?;

        let result = self.sync_folder_inner(fetcher, &folder, options);
        match &result {
            Ok(stats) => {
                self.store
                    .log_sync_complete(log_id, stats.stored, stats.purged, None)?;
                log::info!(
                    "[SYNC] {}: fetched={} stored={} failed={} purged={} threaded={}",
                    folder.name,
                    stats.fetched,
                    stats.stored,
                    stats.failed,
                    stats.purged,
                    stats.threaded
                );
            }
            Err(e) => {
                log::error!("[SYNC] {} failed: {:#}", folder.name, e);
                self.store
                    .log_sync_complete(log_id, 0, 0, Some(&format!("{:#}", e)))?;
            }
        }

        result.map(|mut stats| {
            stats.duration_ms = start.elapsed().as_millis() as u64;
            stats
        })
    }

    fn sync_folder_inner(
        &self,
        fetcher: &dyn Fetcher,
        folder: &Folder,
        options: &SyncOptions,
    ) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let remote = fetcher.list_remote_uids(&folder.name)?;

        if let Some(remote_uids) = &remote {
            // Tombstones count as known: a locally deleted email whose UID
            // is still on the server is not fetched back.
            let known: HashSet<u32> = self
                .store
                .cached_uids(folder.account_id, folder.id)?
                .into_iter()
                .collect();
            let mut missing: Vec<u32> = remote_uids
                .iter()
                .copied()
                .filter(|uid| !known.contains(uid))
                .collect();
            // Newest first, so a capped run still shows recent mail
            missing.sort_unstable_by(|a, b| b.cmp(a));
            missing.truncate(options.max_new);

            for chunk in missing.chunks(options.fetch_chunk.max(1)) {
                let envelopes = fetcher.fetch_envelopes(&folder.name, chunk)?;
                let (batch, ids) = self.upsert_batch(folder.account_id, folder.id, &envelopes)?;
                stats.fetched += batch.fetched;
                stats.stored += batch.stored;
                stats.failed += batch.failed;

                for id in ids {
                    match self.threads.detect_and_update(id) {
                        Ok(Some(_)) => stats.threaded += 1,
                        Ok(None) => {}
                        Err(e) => log::warn!("[SYNC] Thread detection failed for {}: {:#}", id, e),
                    }
                }
            }
        }

        stats.purged = self.purge(folder.account_id, folder.id, remote.as_deref())?;
        self.store.refresh_folder_stats(folder.id)?;
        Ok(stats)
    }
}
