//! Full-text mirror of the emails table
//!
//! `emails_fts` is an FTS5 external-content table over a fixed set of
//! email columns. Triggers on `emails` keep it in step inside the same
//! statement that changes the base row.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::config::SearchTokenizer;

/// Base-table columns mirrored into the index
pub(crate) const MIRRORED_COLUMNS: &[&str] = &["subject", "from_name", "from_email", "body_text"];

const TRIGGERS: &str = r#"
    CREATE TRIGGER IF NOT EXISTS emails_fts_ai AFTER INSERT ON emails BEGIN
        INSERT INTO emails_fts(rowid, subject, from_name, from_email, body_text)
        VALUES (new.id, new.subject, new.from_name, new.from_email, new.body_text);
    END;

    CREATE TRIGGER IF NOT EXISTS emails_fts_ad AFTER DELETE ON emails BEGIN
        INSERT INTO emails_fts(emails_fts, rowid, subject, from_name, from_email, body_text)
        VALUES ('delete', old.id, old.subject, old.from_name, old.from_email, old.body_text);
    END;

    CREATE TRIGGER IF NOT EXISTS emails_fts_au
    AFTER UPDATE OF subject, from_name, from_email, body_text ON emails BEGIN
        INSERT INTO emails_fts(emails_fts, rowid, subject, from_name, from_email, body_text)
        VALUES ('delete', old.id, old.subject, old.from_name, old.from_email, old.body_text);
        INSERT INTO emails_fts(rowid, subject, from_name, from_email, body_text)
        VALUES (new.id, new.subject, new.from_name, new.from_email, new.body_text);
    END;
"#;

fn create_table_sql(tokenizer: SearchTokenizer) -> String {
    format!(
        "CREATE VIRTUAL TABLE emails_fts USING fts5({}, content='emails', content_rowid='id', tokenize='{}')",
        MIRRORED_COLUMNS.join(", "),
        tokenizer.as_sql()
    )
}

/// Tokenizer of the existing mirror, or `None` if there is no mirror.
/// An FTS5 table declared without `tokenize=` uses unicode61.
pub(crate) fn current_tokenizer(conn: &Connection) -> Result<Option<String>> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'emails_fts'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(sql.map(|sql| {
        let lower = sql.to_lowercase();
        lower
            .split_once("tokenize")
            .and_then(|(_, rest)| {
                let rest = rest.trim_start().strip_prefix('=')?.trim_start();
                let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
                let value = &rest[1..];
                let end = value.find(quote)?;
                value[..end].split_whitespace().next().map(str::to_string)
            })
            .unwrap_or_else(|| "unicode61".to_string())
    }))
}

/// Make sure the mirror exists with the desired tokenizer.
///
/// A missing mirror is created; a mirror with a different tokenizer is
/// dropped, recreated and repopulated. Either happens inside one
/// transaction, so readers see the old mirror or the complete new one.
/// Returns true when the mirror was (re)built.
pub(crate) fn ensure_mirror(conn: &mut Connection, desired: SearchTokenizer) -> Result<bool> {
    let current = current_tokenizer(conn)?;
    if current.as_deref() == Some(desired.as_sql()) {
        conn.execute_batch(TRIGGERS)
            .context("Failed to create search triggers")?;
        return Ok(false);
    }

    match &current {
        Some(old) => log::info!(
            "[STORE] Rebuilding search mirror: tokenizer {} -> {}",
            old,
            desired.as_sql()
        ),
        None => log::info!("[STORE] Creating search mirror ({})", desired.as_sql()),
    }

    let tx = conn.transaction()?;
    tx.execute_batch("DROP TABLE IF EXISTS emails_fts")?;
    tx.execute_batch(&create_table_sql(desired))
        .context("Failed to create search mirror")?;
    tx.execute_batch(TRIGGERS)
        .context("Failed to create search triggers")?;
    tx.execute("INSERT INTO emails_fts(emails_fts) VALUES ('rebuild')", [])
        .context("Failed to populate search mirror")?;
    tx.commit()?;
    Ok(true)
}

/// Repopulate the mirror from the base table without changing its shape.
pub(crate) fn rebuild(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("INSERT INTO emails_fts(emails_fts) VALUES ('rebuild')", [])
        .context("Failed to rebuild search mirror")?;
    tx.commit()?;
    Ok(())
}
