//! Store configuration
//!
//! Loaded from `mailcache.json` in the shared config directory, with
//! environment overrides. Every field has a default so a missing or
//! partial file is fine.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Config file name inside the config directory
pub const CONFIG_FILE: &str = "mailcache.json";

/// Environment variable overriding the database path
pub const DB_PATH_ENV: &str = "MAILCACHE_DB_PATH";

const DEFAULT_DB_FILE: &str = "mail.sqlite";

/// Tokenizer used by the full-text search mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTokenizer {
    /// Overlapping 3-character sequences; substring matching
    #[default]
    Trigram,
    /// Word tokens; whole-word matching only
    Unicode61,
}

impl SearchTokenizer {
    /// The `tokenize=` argument for the FTS5 table
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Trigram => "trigram",
            Self::Unicode61 => "unicode61",
        }
    }
}

/// Settings for opening and operating the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; `None` means `<config dir>/mail.sqlite`
    pub db_path: Option<PathBuf>,
    /// How long a locked database is retried before failing
    pub busy_timeout_ms: u64,
    pub search_tokenizer: SearchTokenizer,
    /// Upper bound on the number of emails a batch operation may target
    pub batch_preview_limit: usize,
    pub indexer_batch_size: usize,
    /// Initial indexer throughput, in items per minute
    pub indexer_default_speed: u32,
    pub purge_chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: 5_000,
            search_tokenizer: SearchTokenizer::Trigram,
            batch_preview_limit: 100,
            indexer_batch_size: 50,
            indexer_default_speed: 100,
            purge_chunk_size: 500,
        }
    }
}

impl StoreConfig {
    /// Load configuration with priority:
    /// 1. `MAILCACHE_DB_PATH` for the database path
    /// 2. `~/.config/mailcache/mailcache.json`
    /// 3. Built-in defaults
    pub fn load() -> Result<Self> {
        let mut cfg: StoreConfig = config::load_json_or_default(CONFIG_FILE)?;
        if let Ok(path) = std::env::var(DB_PATH_ENV)
            && !path.trim().is_empty()
        {
            log::debug!("[CONFIG] Database path overridden by {}", DB_PATH_ENV);
            cfg.db_path = Some(PathBuf::from(path));
        }
        Ok(cfg)
    }

    /// Resolve the database path, defaulting into the config directory.
    pub fn resolved_db_path(&self) -> Option<PathBuf> {
        self.db_path
            .clone()
            .or_else(|| config::config_path(DEFAULT_DB_FILE))
    }

    /// Persist this configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        config::save_json(CONFIG_FILE, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: StoreConfig =
            serde_json::from_str(r#"{"search_tokenizer": "unicode61", "batch_preview_limit": 10}"#)
                .unwrap();
        assert_eq!(cfg.search_tokenizer, SearchTokenizer::Unicode61);
        assert_eq!(cfg.batch_preview_limit, 10);
        assert_eq!(cfg.busy_timeout_ms, 5_000);
        assert_eq!(cfg.indexer_batch_size, 50);
    }

    #[test]
    fn test_explicit_db_path_wins() {
        let cfg = StoreConfig {
            db_path: Some(PathBuf::from("/tmp/x.sqlite")),
            ..Default::default()
        };
        assert_eq!(cfg.resolved_db_path(), Some(PathBuf::from("/tmp/x.sqlite")));
    }

    #[test]
    fn test_tokenizer_sql_names() {
        assert_eq!(SearchTokenizer::Trigram.as_sql(), "trigram");
        assert_eq!(SearchTokenizer::Unicode61.as_sql(), "unicode61");
    }
}
