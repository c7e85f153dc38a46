//! Search over cached emails
//!
//! Queries of three or more characters go through the FTS5 mirror; short
//! queries, and indexed queries with no hits, fall back to a substring
//! scan of subject, sender and snippet.

use std::sync::Arc;

use anyhow::Result;
use rusqlite::{Connection, params};

use super::query::{MIN_TRIGRAM_TERM, escape_like, match_expression};
use crate::config::SearchTokenizer;
use crate::models::EmailSummary;
use crate::storage::{PersistentStore, SUMMARY_COLUMNS, fts, select_list, summary_from_row};

/// Shortest query sent to the index
pub const MIN_INDEXED_QUERY: usize = 3;

/// How a search was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPath {
    Indexed,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct SearchResults {
    pub emails: Vec<EmailSummary>,
    pub path: SearchPath,
}

pub struct SearchIndex {
    store: Arc<PersistentStore>,
}

impl SearchIndex {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    /// Search visible emails of an account, newest first.
    pub fn search(&self, account_id: i64, query: &str, limit: usize) -> Result<Vec<EmailSummary>> {
        Ok(self.search_detailed(account_id, None, query, limit)?.emails)
    }

    pub fn search_in_folder(
        &self,
        account_id: i64,
        folder_id: i64,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EmailSummary>> {
        Ok(self
            .search_detailed(account_id, Some(folder_id), query, limit)?
            .emails)
    }

    /// Search and report which path produced the results.
    pub fn search_detailed(
        &self,
        account_id: i64,
        folder_id: Option<i64>,
        query: &str,
        limit: usize,
    ) -> Result<SearchResults> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(SearchResults {
                emails: Vec::new(),
                path: SearchPath::Fallback,
            });
        }

        self.store.with_conn(|conn| {
            // Short terms only matter to the tokenizer the mirror was built with
            let trigram = fts::current_tokenizer(conn)?
                .is_none_or(|t| t == SearchTokenizer::Trigram.as_sql());
            let min_term = trigram.then_some(MIN_TRIGRAM_TERM);

            if query.chars().count() >= MIN_INDEXED_QUERY
                && let Some(expr) = match_expression(query, min_term)
            {
                match indexed(conn, account_id, folder_id, &expr, limit) {
                    Ok(emails) if !emails.is_empty() => {
                        return Ok(SearchResults {
                            emails,
                            path: SearchPath::Indexed,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("[SEARCH] Index query {:?} failed, scanning: {:#}", expr, e)
                    }
                }
            }

            Ok(SearchResults {
                emails: fallback(conn, account_id, folder_id, query, limit)?,
                path: SearchPath::Fallback,
            })
        })
    }

    /// Tokenizer of the live mirror
    pub fn current_tokenizer(&self) -> Result<Option<String>> {
        self.store.with_conn(fts::current_tokenizer)
    }

    /// Recreate the mirror if its tokenizer differs from `desired`.
    /// Returns true when it was rebuilt.
    pub fn ensure_mirror(&self, desired: SearchTokenizer) -> Result<bool> {
        self.store
            .with_conn_mut(|conn| fts::ensure_mirror(conn, desired))
    }

    /// Repopulate the mirror from the emails table.
    pub fn rebuild(&self) -> Result<()> {
        self.store.with_conn_mut(fts::rebuild)?;
        log::info!("[SEARCH] Mirror rebuilt");
        Ok(())
    }
}

fn indexed(
    conn: &Connection,
    account_id: i64,
    folder_id: Option<i64>,
    expr: &str,
    limit: usize,
) -> Result<Vec<EmailSummary>> {
    let sql = format!(
        r#"
        SELECT {} FROM emails_fts
        JOIN emails e ON e.id = emails_fts.rowid
        WHERE emails_fts MATCH ?1
          AND e.account_id = ?2 AND e.is_deleted = 0 AND e.is_archived = 0
          AND (?3 IS NULL OR e.folder_id = ?3)
        ORDER BY e.date DESC, e.id DESC
        LIMIT ?4
        "#,
        select_list(SUMMARY_COLUMNS, Some("e"))
    );
    let mut stmt = conn.prepare(&sql)?;
    let emails = stmt
        .query_map(params![expr, account_id, folder_id, limit as i64], summary_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(emails)
}

fn fallback(
    conn: &Connection,
    account_id: i64,
    folder_id: Option<i64>,
    query: &str,
    limit: usize,
) -> Result<Vec<EmailSummary>> {
    let pattern = format!("%{}%", escape_like(query));
    let sql = format!(
        r#"
        SELECT {} FROM emails
        WHERE account_id = ?1 AND is_deleted = 0 AND is_archived = 0
          AND (?3 IS NULL OR folder_id = ?3)
          AND (subject LIKE ?2 ESCAPE '\'
               OR from_name LIKE ?2 ESCAPE '\'
               OR from_email LIKE ?2 ESCAPE '\'
               OR snippet LIKE ?2 ESCAPE '\')
        ORDER BY date DESC, id DESC
        LIMIT ?4
        "#,
        select_list(SUMMARY_COLUMNS, None)
    );
    let mut stmt = conn.prepare(&sql)?;
    let emails = stmt
        .query_map(params![account_id, pattern, folder_id, limit as i64], summary_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(emails)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreConfig;
    use crate::models::EmailAddress;
    use crate::storage::create_test_store;
    use crate::sync::SyncReconciler;
    use crate::sync::fake::envelope;

    struct Fixture {
        store: Arc<PersistentStore>,
        sync: SyncReconciler,
        search: SearchIndex,
        account: i64,
        inbox: i64,
    }

    fn fixture_with(store: PersistentStore) -> Fixture {
        let account = store.get_or_create_account("me@x.com", None).unwrap().id;
        let inbox = store.get_or_create_folder(account, "INBOX").unwrap().id;
        let store = Arc::new(store);
        Fixture {
            sync: SyncReconciler::new(store.clone()),
            search: SearchIndex::new(store.clone()),
            store,
            account,
            inbox,
        }
    }

    fn seed(f: &Fixture) {
        f.sync
            .upsert(
                f.account,
                f.inbox,
                &envelope(1)
                    .subject("Quarterly report")
                    .from(EmailAddress::with_name("Ana Lima", "ana@corp.com"))
                    .snippet("numbers attached")
                    .body_text("The invoice total is attached")
                    .build(),
            )
            .unwrap();
        f.sync
            .upsert(
                f.account,
                f.inbox,
                &envelope(2)
                    .subject("Lunch?")
                    .from(EmailAddress::new("bo@corp.com"))
                    .snippet("ok at 12")
                    .build(),
            )
            .unwrap();
    }

    #[test]
    fn test_indexed_substring_match() {
        let (store, _dir) = create_test_store();
        let f = fixture_with(store);
        seed(&f);

        let res = f.search.search_detailed(f.account, None, "nvoic", 10).unwrap();
        assert_eq!(res.path, SearchPath::Indexed);
        assert_eq!(res.emails.len(), 1);
        assert_eq!(res.emails[0].subject, "Quarterly report");
    }

    #[test]
    fn test_multi_word_query_is_or() {
        let (store, _dir) = create_test_store();
        let f = fixture_with(store);
        seed(&f);

        let res = f.search.search(f.account, "quarterly lunch", 10).unwrap();
        assert_eq!(res.len(), 2);
        // Newest first
        assert_eq!(res[0].subject, "Lunch?");
    }

    #[test]
    fn test_short_query_uses_fallback() {
        let (store, _dir) = create_test_store();
        let f = fixture_with(store);
        seed(&f);

        let res = f.search.search_detailed(f.account, None, "12", 10).unwrap();
        assert_eq!(res.path, SearchPath::Fallback);
        assert_eq!(res.emails.len(), 1);
        assert_eq!(res.emails[0].subject, "Lunch?");
    }

    #[test]
    fn test_no_index_hits_falls_back() {
        let (store, _dir) = create_test_store();
        let f = fixture_with(store);
        seed(&f);

        // Snippets are not mirrored, so only the scan finds this
        let res = f.search.search_detailed(f.account, None, "numbers", 10).unwrap();
        assert_eq!(res.path, SearchPath::Fallback);
        assert_eq!(res.emails.len(), 1);

        let none = f.search.search_detailed(f.account, None, "zzzzzz", 10).unwrap();
        assert_eq!(none.path, SearchPath::Fallback);
        assert!(none.emails.is_empty());
    }

    #[test]
    fn test_fallback_treats_wildcards_literally() {
        let (store, _dir) = create_test_store();
        let f = fixture_with(store);
        seed(&f);
        assert!(f.search.search(f.account, "%", 10).unwrap().is_empty());
        assert!(f.search.search(f.account, "", 10).unwrap().is_empty());
    }

    #[test]
    fn test_hidden_rows_are_excluded_and_mirror_follows_updates() {
        let (store, _dir) = create_test_store();
        let f = fixture_with(store);
        seed(&f);
        let report = f.search.search(f.account, "Quarterly", 10).unwrap()[0].id;

        f.store.set_archived(report, true).unwrap();
        assert!(f.search.search(f.account, "Quarterly", 10).unwrap().is_empty());
        f.store.set_archived(report, false).unwrap();

        // Subject change propagates through the update trigger
        f.sync
            .upsert(f.account, f.inbox, &envelope(1).subject("Annual summary").build())
            .unwrap();
        assert!(
            f.search
                .search_detailed(f.account, None, "Quarterly", 10)
                .unwrap()
                .emails
                .is_empty()
        );
        let res = f.search.search_detailed(f.account, None, "annual", 10).unwrap();
        assert_eq!(res.path, SearchPath::Indexed);
        assert_eq!(res.emails[0].id, report);
    }

    #[test]
    fn test_search_in_folder() {
        let (store, _dir) = create_test_store();
        let f = fixture_with(store);
        seed(&f);
        let other = f.store.get_or_create_folder(f.account, "Work").unwrap().id;
        f.sync
            .upsert(f.account, other, &envelope(9).subject("Quarterly plan").build())
            .unwrap();

        assert_eq!(f.search.search(f.account, "quarterly", 10).unwrap().len(), 2);
        let in_work = f.search.search_in_folder(f.account, other, "quarterly", 10).unwrap();
        assert_eq!(in_work.len(), 1);
        assert_eq!(in_work[0].folder_id, other);
    }

    #[test]
    fn test_tokenizer_migration_repopulates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mail.sqlite");
        let word_config = StoreConfig {
            search_tokenizer: SearchTokenizer::Unicode61,
            ..Default::default()
        };
        {
            let f = fixture_with(PersistentStore::open(&path, &word_config).unwrap());
            seed(&f);
            // Word tokenizer: no substring hits, so the scan answers
            let res = f.search.search_detailed(f.account, None, "nvoic", 10).unwrap();
            assert_eq!(res.path, SearchPath::Fallback);
            assert!(res.emails.is_empty());
            assert_eq!(f.search.current_tokenizer().unwrap().as_deref(), Some("unicode61"));
        }

        let f = fixture_with(PersistentStore::open_with_defaults(&path).unwrap());
        assert_eq!(f.search.current_tokenizer().unwrap().as_deref(), Some("trigram"));
        let res = f.search.search_detailed(f.account, None, "nvoic", 10).unwrap();
        assert_eq!(res.path, SearchPath::Indexed);
        assert_eq!(res.emails.len(), 1);

        f.search.rebuild().unwrap();
        assert!(!f.search.ensure_mirror(SearchTokenizer::Trigram).unwrap());
        assert_eq!(f.search.search(f.account, "nvoic", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_short_terms_follow_live_tokenizer() {
        let (store, _dir) = create_test_store();
        let f = fixture_with(store);
        seed(&f);
        f.sync
            .upsert(f.account, f.inbox, &envelope(3).subject("Go live").build())
            .unwrap();

        // Trigram mirror: "go" cannot match and is dropped
        let res = f.search.search_detailed(f.account, None, "go zzzz", 10).unwrap();
        assert_eq!(res.path, SearchPath::Fallback);
        assert!(res.emails.is_empty());

        // After switching the mirror to words, "go" is a valid term
        assert!(f.search.ensure_mirror(SearchTokenizer::Unicode61).unwrap());
        let res = f.search.search_detailed(f.account, None, "go zzzz", 10).unwrap();
        assert_eq!(res.path, SearchPath::Indexed);
        assert_eq!(res.emails.len(), 1);
        assert_eq!(res.emails[0].subject, "Go live");
    }
}
