//! Schema and migrations
//!
//! Table creation is versioned through `rusqlite_migration`. Column
//! additions go through [`ensure_columns`], which inspects the live table
//! first, so databases written by older builds (columns present, version
//! unknown) migrate without error. Both steps are safe to repeat.

use anyhow::{Context, Result};
use rusqlite::Connection;
use rusqlite_migration::{M, Migrations};

/// Versioned migrations. The user_version pragma tracks which have run.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: mailbox cache
        M::up(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                display_name TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS folders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                total_messages INTEGER NOT NULL DEFAULT 0,
                unread_messages INTEGER NOT NULL DEFAULT 0,
                last_sync TEXT,
                UNIQUE(account_id, name)
            );

            CREATE TABLE IF NOT EXISTS emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                folder_id INTEGER NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
                uid INTEGER NOT NULL,
                message_id TEXT,
                subject TEXT NOT NULL DEFAULT '',
                from_name TEXT,
                from_email TEXT NOT NULL DEFAULT '',
                to_addresses TEXT,
                cc_addresses TEXT,
                date TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                snippet TEXT NOT NULL DEFAULT '',
                body_text TEXT,
                body_html BLOB,  -- zstd compressed
                raw_headers TEXT,
                size INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(account_id, folder_id, uid)
            );

            CREATE INDEX IF NOT EXISTS idx_emails_account_date
                ON emails(account_id, date DESC);
            CREATE INDEX IF NOT EXISTS idx_emails_folder ON emails(folder_id);
            CREATE INDEX IF NOT EXISTS idx_emails_from ON emails(from_email);

            CREATE TABLE IF NOT EXISTS app_settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(account_id, key)
            );

            CREATE TABLE IF NOT EXISTS sync_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                folder_id INTEGER REFERENCES folders(id) ON DELETE SET NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                new_emails INTEGER NOT NULL DEFAULT 0,
                deleted_emails INTEGER NOT NULL DEFAULT 0,
                error TEXT
            );
            "#,
        ),
        // Migration 2: drafts, staged operations, indexer state, history
        M::up(
            r#"
            CREATE TABLE IF NOT EXISTS drafts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                to_addresses TEXT NOT NULL,
                cc_addresses TEXT,
                bcc_addresses TEXT,
                subject TEXT NOT NULL DEFAULT '',
                body_text TEXT NOT NULL DEFAULT '',
                body_html BLOB,
                in_reply_to TEXT,
                reference_ids TEXT,
                reply_to_email_id INTEGER,
                status TEXT NOT NULL DEFAULT 'draft',
                scheduled_send_at TEXT,
                sent_at TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_drafts_status ON drafts(account_id, status);

            CREATE TABLE IF NOT EXISTS pending_batch_ops (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                operation TEXT NOT NULL,
                description TEXT NOT NULL,
                filter_query TEXT NOT NULL,
                email_ids TEXT NOT NULL,
                email_count INTEGER NOT NULL,
                preview_data TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                executed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS content_index_state (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL UNIQUE REFERENCES accounts(id) ON DELETE CASCADE,
                status TEXT NOT NULL DEFAULT 'idle',
                total_emails INTEGER NOT NULL DEFAULT 0,
                indexed_emails INTEGER NOT NULL DEFAULT 0,
                last_indexed_uid INTEGER,
                speed INTEGER NOT NULL DEFAULT 100,
                last_error TEXT,
                started_at TEXT,
                paused_at TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- History tables are append-only: no foreign keys, so removing
            -- an account or folder never cascades into them.
            CREATE TABLE IF NOT EXISTS emails_archive (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_id INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                folder_id INTEGER NOT NULL,
                uid INTEGER NOT NULL,
                message_id TEXT,
                subject TEXT NOT NULL,
                from_name TEXT,
                from_email TEXT NOT NULL,
                to_addresses TEXT,
                cc_addresses TEXT,
                date TEXT NOT NULL,
                snippet TEXT NOT NULL,
                body_text TEXT,
                body_html BLOB,
                raw_headers TEXT,
                thread_id TEXT,
                original_created_at TEXT NOT NULL,
                original_updated_at TEXT NOT NULL,
                archived_at TEXT NOT NULL,
                archive_reason TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_emails_archive_account
                ON emails_archive(account_id, archived_at DESC);

            CREATE TABLE IF NOT EXISTS drafts_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_id INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                to_addresses TEXT NOT NULL,
                cc_addresses TEXT,
                bcc_addresses TEXT,
                subject TEXT NOT NULL,
                body_text TEXT NOT NULL,
                body_html BLOB,
                in_reply_to TEXT,
                reference_ids TEXT,
                reply_to_email_id INTEGER,
                final_status TEXT NOT NULL,
                error_message TEXT,
                original_created_at TEXT NOT NULL,
                archived_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sent_emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                message_id TEXT,
                to_addresses TEXT NOT NULL,
                cc_addresses TEXT,
                bcc_addresses TEXT,
                subject TEXT NOT NULL,
                body_text TEXT NOT NULL,
                in_reply_to TEXT,
                reference_ids TEXT,
                reply_to_email_id INTEGER,
                send_method TEXT NOT NULL,
                draft_id INTEGER,
                sent_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sent_emails_account
                ON sent_emails(account_id, sent_at DESC);
            "#,
        ),
    ])
}

/// Columns added after the first release: (table, column, declaration).
const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("emails", "is_replied", "INTEGER NOT NULL DEFAULT 0"),
    ("emails", "is_archived", "INTEGER NOT NULL DEFAULT 0"),
    ("emails", "body_indexed", "INTEGER NOT NULL DEFAULT 0"),
    ("emails", "in_reply_to", "TEXT"),
    ("emails", "\"references\"", "TEXT"),
    ("emails", "thread_id", "TEXT"),
    ("emails", "thread_synced_at", "TEXT"),
    ("emails_archive", "is_read", "INTEGER NOT NULL DEFAULT 0"),
    ("emails_archive", "is_starred", "INTEGER NOT NULL DEFAULT 0"),
    ("emails_archive", "is_replied", "INTEGER NOT NULL DEFAULT 0"),
    ("emails_archive", "has_attachments", "INTEGER NOT NULL DEFAULT 0"),
    ("emails_archive", "size", "INTEGER NOT NULL DEFAULT 0"),
    ("emails_archive", "in_reply_to", "TEXT"),
    ("emails_archive", "\"references\"", "TEXT"),
    ("drafts_history", "scheduled_send_at", "TEXT"),
    ("drafts_history", "sent_at", "TEXT"),
    ("drafts_history", "original_updated_at", "TEXT"),
];

/// Indexes over the additive columns; created once the columns exist.
const ADDITIVE_INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_emails_archived ON emails(account_id, is_archived);
    CREATE INDEX IF NOT EXISTS idx_emails_body_indexed ON emails(account_id, body_indexed);
    CREATE INDEX IF NOT EXISTS idx_emails_thread ON emails(account_id, thread_id);
    CREATE INDEX IF NOT EXISTS idx_emails_message_id ON emails(message_id);
    CREATE INDEX IF NOT EXISTS idx_emails_in_reply_to ON emails(in_reply_to);
"#;

/// Run versioned migrations then additive column changes.
pub(crate) fn apply(conn: &mut Connection) -> Result<()> {
    migrations()
        .to_latest(conn)
        .context("Failed to run database migrations")?;

    let added = ensure_columns(conn)?;
    if added > 0 {
        log::info!("[STORE] Added {} column(s) to existing tables", added);
    }
    conn.execute_batch(ADDITIVE_INDEXES)
        .context("Failed to create indexes")?;
    Ok(())
}

/// Add every missing column from [`ADDITIVE_COLUMNS`]. Returns how many were added.
fn ensure_columns(conn: &Connection) -> Result<usize> {
    let mut added = 0;
    for (table, column, decl) in ADDITIVE_COLUMNS {
        let bare = column.trim_matches('"');
        if table_columns(conn, table)?.iter().any(|c| c == bare) {
            continue;
        }
        conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))
            .with_context(|| format!("Failed to add column {}.{}", table, bare))?;
        added += 1;
    }
    Ok(added)
}

/// Column names of a table, in declaration order.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let names = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}
