//! Integration tests for the mailcache crate
//!
//! These drive the public API end to end: sync from a scripted server,
//! threading, search, body indexing, batch actions and archiving.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::{Duration, TimeZone, Utc};
use mailcache::{
    ArchiveReason, BatchFilter, BatchOperation, DraftStatus, EmailAddress, Fetcher, IndexStatus,
    MailCache, NewDraft, NewEmail, SendMethod, StoreConfig, SyncOptions,
};
use tempfile::TempDir;

/// Scripted server: folders of envelopes plus message bodies
#[derive(Default)]
struct Server {
    folders: Mutex<BTreeMap<String, BTreeMap<u32, NewEmail>>>,
    bodies: Mutex<BTreeMap<u32, String>>,
    offline: Mutex<bool>,
}

impl Server {
    fn deliver(&self, folder: &str, email: NewEmail) {
        self.folders
            .lock()
            .unwrap()
            .entry(folder.to_string())
            .or_default()
            .insert(email.uid, email);
    }

    fn expunge(&self, folder: &str, uid: u32) {
        if let Some(f) = self.folders.lock().unwrap().get_mut(folder) {
            f.remove(&uid);
        }
    }

    fn set_body(&self, uid: u32, text: &str) {
        self.bodies.lock().unwrap().insert(uid, text.to_string());
    }

    fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }
}

impl Fetcher for Server {
    fn list_remote_uids(&self, folder: &str) -> Result<Option<Vec<u32>>> {
        if *self.offline.lock().unwrap() {
            return Ok(None);
        }
        Ok(self
            .folders
            .lock()
            .unwrap()
            .get(folder)
            .map(|f| f.keys().copied().collect()))
    }

    fn fetch_envelopes(&self, folder: &str, uids: &[u32]) -> Result<Vec<NewEmail>> {
        let folders = self.folders.lock().unwrap();
        let f = folders
            .get(folder)
            .ok_or_else(|| anyhow!("no such folder: {}", folder))?;
        Ok(uids.iter().filter_map(|uid| f.get(uid).cloned()).collect())
    }

    fn fetch_body_text(&self, _folder: &str, uid: u32) -> Result<Option<String>> {
        Ok(self.bodies.lock().unwrap().get(&uid).cloned())
    }
}

fn message(uid: u32, subject: &str, from: &str, message_id: &str) -> NewEmail {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    NewEmail::builder(uid)
        .message_id(message_id)
        .subject(subject)
        .from(EmailAddress::parse(from))
        .to(vec![EmailAddress::new("me@example.com")])
        .snippet(format!("{} preview", subject))
        .date(base + Duration::hours(uid as i64))
        .build()
}

fn open_cache(dir: &TempDir) -> MailCache {
    MailCache::open(dir.path().join("mail.sqlite"), &StoreConfig::default()).unwrap()
}

/// Inbox with a two-message conversation and a newsletter
fn seed_server() -> Server {
    let server = Server::default();
    server.deliver("INBOX", message(1, "Trip plans", "Ana <ana@example.com>", "<trip@ex.com>"));
    let mut reply = message(2, "Re: Trip plans", "Bo <bo@example.com>", "<trip-2@ex.com>");
    reply.in_reply_to = Some("<trip@ex.com>".to_string());
    server.deliver("INBOX", reply);
    server.deliver("INBOX", message(3, "Weekly deals", "Shop <news@shop.com>", "<deal@shop.com>"));
    server
}

#[test]
fn test_full_sync_flow() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);
    let server = seed_server();
    let account = cache.store.get_or_create_account("me@example.com", Some("Me")).unwrap();

    let stats = cache
        .sync
        .sync_folder(&server, account.id, "INBOX", &SyncOptions::default())
        .unwrap();
    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.stored, 3);
    assert_eq!(stats.purged, 0);

    let inbox = cache.store.get_folder_by_name(account.id, "INBOX").unwrap().unwrap();
    assert_eq!(inbox.total_messages, 3);
    assert_eq!(inbox.unread_messages, 3);
    assert!(cache.store.last_sync_time(account.id).unwrap().is_some());

    // The reply joins its parent's thread
    let root = cache.store.get_email_by_uid(account.id, inbox.id, 1).unwrap().unwrap();
    let thread_id = root.thread_id.clone().unwrap();
    assert_eq!(thread_id, "trip@ex.com");
    let thread = cache.threads.list_thread(&thread_id, account.id).unwrap();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].subject, "Re: Trip plans");
    assert_eq!(cache.threads.count_participants(&thread_id, account.id).unwrap(), 2);

    // A second sync with nothing new is a no-op
    let again = cache
        .sync
        .sync_folder(&server, account.id, "INBOX", &SyncOptions::default())
        .unwrap();
    assert_eq!(again.fetched, 0);
    assert_eq!(cache.store.count_emails(account.id, None).unwrap(), 3);

    // The server expunges the newsletter
    server.expunge("INBOX", 3);
    let purged = cache
        .sync
        .sync_folder(&server, account.id, "INBOX", &SyncOptions::default())
        .unwrap();
    assert_eq!(purged.purged, 1);
    let gone = cache.store.get_email_by_uid(account.id, inbox.id, 3).unwrap().unwrap();
    assert!(gone.is_deleted);
    assert!(cache.search.search(account.id, "deals", 10).unwrap().is_empty());

    // Archive the tombstone
    assert!(
        cache
            .archive
            .archive_permanently(gone.id, ArchiveReason::ServerPurged)
            .unwrap()
    );
    assert_eq!(cache.archive.count_archived(account.id).unwrap(), 1);
    assert!(cache.store.get_email(gone.id).unwrap().is_none());
}

#[test]
fn test_unknown_remote_listing_never_purges() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);
    let server = seed_server();
    let account = cache.store.get_or_create_account("me@example.com", None).unwrap();
    cache
        .sync
        .sync_folder(&server, account.id, "INBOX", &SyncOptions::default())
        .unwrap();

    server.set_offline(true);
    let stats = cache
        .sync
        .sync_folder(&server, account.id, "INBOX", &SyncOptions::default())
        .unwrap();
    assert_eq!(stats.purged, 0);
    assert_eq!(cache.store.count_emails(account.id, None).unwrap(), 3);

    let inbox = cache.store.get_folder_by_name(account.id, "INBOX").unwrap().unwrap();
    assert_eq!(cache.sync.purge(account.id, inbox.id, Some(&[])).unwrap(), 0);
    assert_eq!(cache.sync.purge(account.id, inbox.id, None).unwrap(), 0);
}

#[test]
fn test_body_indexing_makes_content_searchable() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);
    let server = seed_server();
    server.set_body(1, "Flights land in Lisbon at noon");
    server.set_body(2, "Booked the hotel");
    let account = cache.store.get_or_create_account("me@example.com", None).unwrap();
    cache
        .sync
        .sync_folder(&server, account.id, "INBOX", &SyncOptions::default())
        .unwrap();

    assert!(cache.search.search(account.id, "Lisbon", 10).unwrap().is_empty());

    cache.indexer.start(account.id).unwrap();
    let mut rounds = 0;
    loop {
        let report = cache.indexer.run_batch(&server, account.id).unwrap();
        rounds += 1;
        if report.status != IndexStatus::Running || rounds > 10 {
            break;
        }
    }
    let state = cache.indexer.state(account.id).unwrap();
    assert_eq!(state.status, IndexStatus::Completed);
    assert_eq!(state.indexed_emails, 3);
    assert_eq!(cache.indexer.count_remaining(account.id).unwrap(), 0);

    let hits = cache.search.search(account.id, "Lisbon", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].subject, "Trip plans");
}

#[test]
fn test_batch_mark_read_by_sender() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);
    let server = seed_server();
    let account = cache.store.get_or_create_account("me@example.com", None).unwrap();
    cache
        .sync
        .sync_folder(&server, account.id, "INBOX", &SyncOptions::default())
        .unwrap();

    let op = cache
        .batch
        .prepare(account.id, BatchOperation::MarkRead, &BatchFilter::from_sender("example.com"))
        .unwrap();
    assert_eq!(op.email_count, 2);
    assert_eq!(op.description, "Mark as read 2 emails from 'example.com'");
    assert_eq!(cache.store.count_unread(account.id, None).unwrap(), 3);

    cache.batch.confirm(op.id).unwrap();
    assert_eq!(cache.batch.execute(op.id).unwrap(), 2);
    assert_eq!(cache.store.count_unread(account.id, None).unwrap(), 1);
    assert!(cache.batch.execute(op.id).is_err());
}

#[test]
fn test_draft_send_flow() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir);
    let account = cache.store.get_or_create_account("me@example.com", None).unwrap();

    let draft = cache
        .drafts
        .create(&NewDraft {
            account_id: account.id,
            to: vec![EmailAddress::new("ana@example.com")],
            subject: "Hello".to_string(),
            body_text: "Hi".to_string(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(cache.drafts.count_pending(account.id).unwrap(), 1);

    cache.drafts.mark_sending(draft.id).unwrap();
    cache
        .archive
        .finalize_sent_draft(draft.id, Some("<out-1@example.com>"), SendMethod::Smtp)
        .unwrap();

    assert!(cache.drafts.get(draft.id).unwrap().is_none());
    assert!(cache.drafts.list(account.id, Some(DraftStatus::Draft)).unwrap().is_empty());
    assert_eq!(cache.archive.list_sent_emails(account.id, 10).unwrap().len(), 1);
    assert_eq!(cache.archive.list_draft_history(account.id, 10).unwrap().len(), 1);
}

#[test]
fn test_reopen_keeps_data_and_schema() {
    let dir = TempDir::new().unwrap();
    let server = seed_server();
    {
        let cache = open_cache(&dir);
        let account = cache.store.get_or_create_account("me@example.com", None).unwrap();
        cache
            .sync
            .sync_folder(&server, account.id, "INBOX", &SyncOptions::default())
            .unwrap();
    }

    let cache = open_cache(&dir);
    cache.store.migrate().unwrap();
    let account = cache
        .store
        .get_account_by_email("me@example.com")
        .unwrap()
        .unwrap();
    assert_eq!(cache.store.count_emails(account.id, None).unwrap(), 3);
    assert_eq!(cache.search.search(account.id, "Trip", 10).unwrap().len(), 2);
}
