//! SQLite-backed persistent store
//!
//! One connection behind a mutex. Components receive the store by `Arc`
//! and run their SQL through [`PersistentStore::with_conn`] and
//! [`PersistentStore::with_tx`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};

use super::codec::{now_ts, parse_ts, ts_col, ts_col_opt};
use super::{fts, schema};
use crate::config::StoreConfig;
use crate::models::{Account, Folder};

pub struct PersistentStore {
    conn: Mutex<Connection>,
    config: StoreConfig,
}

impl PersistentStore {
    /// Open (or create) the database at `db_path` and bring the schema up to date.
    pub fn open(db_path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets readers proceed while a write is in progress; with WAL,
        // synchronous=NORMAL only syncs at checkpoints.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;

        let store = Self {
            conn: Mutex::new(conn),
            config: config.clone(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_with_defaults(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::open(db_path, &StoreConfig::default())
    }

    /// Open the database named by the loaded configuration.
    pub fn open_configured(config: &StoreConfig) -> Result<Self> {
        let path = config
            .resolved_db_path()
            .context("Could not determine database path")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        log::info!("[STORE] Opening {}", path.display());
        Self::open(path, config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Apply migrations and make sure the search mirror matches the
    /// configured tokenizer. Safe to call any number of times.
    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.conn()?;
        schema::apply(&mut conn)?;
        if fts::ensure_mirror(&mut conn, self.config.search_tokenizer)? {
            log::info!("[STORE] Search mirror ready");
        }
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Connection lock poisoned: {}", e))
    }

    /// Run `f` with the shared connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn()?;
        f(&conn)
    }

    /// Run `f` with exclusive access to the connection (schema work).
    pub(crate) fn with_conn_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run `f` in a transaction; commits on `Ok`, rolls back on `Err`.
    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    /// Return the account for `email`, creating it if needed.
    pub fn get_or_create_account(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<Account> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO accounts (email, display_name, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email) DO NOTHING",
                params![email, display_name, now_ts()],
            )?;
            let account = tx.query_row(
                "SELECT id, email, display_name, created_at FROM accounts WHERE email = ?1",
                [email],
                account_from_row,
            )?;
            Ok(account)
        })
    }

    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, email, display_name, created_at FROM accounts WHERE id = ?1",
                    [id],
                    account_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, email, display_name, created_at FROM accounts WHERE email = ?1",
                    [email],
                    account_from_row,
                )
                .optional()?)
        })
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, display_name, created_at FROM accounts ORDER BY id",
            )?;
            let accounts = stmt
                .query_map([], account_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(accounts)
        })
    }

    /// Change the display name. Returns false if the account does not exist.
    pub fn rename_account(&self, id: i64, display_name: Option<&str>) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE accounts SET display_name = ?1 WHERE id = ?2",
                params![display_name, id],
            )?;
            Ok(n > 0)
        })
    }

    // ---------------------------------------------------------------------
    // Folders
    // ---------------------------------------------------------------------

    pub fn get_or_create_folder(&self, account_id: i64, name: &str) -> Result<Folder> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO folders (account_id, name) VALUES (?1, ?2)
                 ON CONFLICT(account_id, name) DO NOTHING",
                params![account_id, name],
            )?;
            let folder = tx.query_row(
                &format!("{} WHERE account_id = ?1 AND name = ?2", FOLDER_SELECT),
                params![account_id, name],
                folder_from_row,
            )?;
            Ok(folder)
        })
    }

    pub fn get_folder(&self, id: i64) -> Result<Option<Folder>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(&format!("{} WHERE id = ?1", FOLDER_SELECT), [id], folder_from_row)
                .optional()?)
        })
    }

    pub fn get_folder_by_name(&self, account_id: i64, name: &str) -> Result<Option<Folder>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("{} WHERE account_id = ?1 AND name = ?2", FOLDER_SELECT),
                    params![account_id, name],
                    folder_from_row,
                )
                .optional()?)
        })
    }

    pub fn list_folders(&self, account_id: i64) -> Result<Vec<Folder>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} WHERE account_id = ?1 ORDER BY name", FOLDER_SELECT))?;
            let folders = stmt
                .query_map([account_id], folder_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(folders)
        })
    }

    /// Recompute the cached counts of a folder from its email rows and
    /// stamp the sync time.
    pub fn refresh_folder_stats(&self, folder_id: i64) -> Result<Option<Folder>> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE folders SET
                    total_messages = (SELECT COUNT(*) FROM emails
                        WHERE folder_id = ?1 AND is_deleted = 0 AND is_archived = 0),
                    unread_messages = (SELECT COUNT(*) FROM emails
                        WHERE folder_id = ?1 AND is_deleted = 0 AND is_archived = 0
                          AND is_read = 0),
                    last_sync = ?2
                WHERE id = ?1
                "#,
                params![folder_id, now_ts()],
            )?;
            let sql = format!("{} WHERE id = ?1", FOLDER_SELECT);
            Ok(conn.query_row(&sql, [folder_id], folder_from_row).optional()?)
        })
    }

    // ---------------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------------

    pub fn get_setting(&self, account_id: i64, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM app_settings WHERE account_id = ?1 AND key = ?2",
                    params![account_id, key],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    pub fn set_setting(&self, account_id: i64, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO app_settings (account_id, key, value, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(account_id, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![account_id, key, value, now_ts()],
            )?;
            Ok(())
        })
    }

    pub fn all_settings(&self, account_id: i64) -> Result<BTreeMap<String, String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key, value FROM app_settings WHERE account_id = ?1")?;
            let settings = stmt
                .query_map([account_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            Ok(settings)
        })
    }

    // ---------------------------------------------------------------------
    // Sync log
    // ---------------------------------------------------------------------

    /// Record the start of a sync run and return its log id.
    pub fn log_sync_start(&self, account_id: i64, folder_id: Option<i64>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_logs (account_id, folder_id, started_at) VALUES (?1, ?2, ?3)",
                params![account_id, folder_id, now_ts()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn log_sync_complete(
        &self,
        log_id: i64,
        new_emails: usize,
        deleted_emails: usize,
        error: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                UPDATE sync_logs SET completed_at = ?1, new_emails = ?2,
                    deleted_emails = ?3, error = ?4
                WHERE id = ?5
                "#,
                params![now_ts(), new_emails as i64, deleted_emails as i64, error, log_id],
            )?;
            Ok(())
        })
    }

    /// Completion time of the latest successful sync run.
    pub fn last_sync_time(&self, account_id: i64) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn.query_row(
                r#"
                SELECT MAX(completed_at) FROM sync_logs
                WHERE account_id = ?1 AND completed_at IS NOT NULL AND error IS NULL
                "#,
                [account_id],
                |row| row.get(0),
            )?;
            Ok(raw.as_deref().map(parse_ts).transpose()?)
        })
    }

    /// Emails cached since the latest successful sync started.
    pub fn count_new_since_last_sync(&self, account_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                r#"
                SELECT COUNT(*) FROM emails
                WHERE account_id = ?1 AND is_deleted = 0
                  AND created_at >= COALESCE((
                      SELECT MAX(started_at) FROM sync_logs
                      WHERE account_id = ?1 AND completed_at IS NOT NULL AND error IS NULL
                  ), '')
                "#,
                [account_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}

const FOLDER_SELECT: &str =
    "SELECT id, account_id, name, total_messages, unread_messages, last_sync FROM folders";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        created_at: ts_col(row, 3)?,
    })
}

fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        total_messages: row.get(3)?,
        unread_messages: row.get(4)?,
        last_sync: ts_col_opt(row, 5)?,
    })
}
