//! Mailcache - local persistence and reconciliation for a mail client
//!
//! This crate keeps an embedded SQLite cache of one or more mailboxes:
//! - Schema, migrations and typed access (`storage`)
//! - Upsert and purge against the server's UID set (`sync`)
//! - Conversation threading from headers (`threads`)
//! - Full-text search with a substring fallback (`search`)
//! - Resumable body backfill for search (`indexer`)
//! - Previewed, two-phase bulk actions (`batch`)
//! - Archive-then-delete history tables (`archive`)
//! - Outgoing drafts (`drafts`)
//!
//! Network access is not part of this crate. Remote data arrives through
//! the [`Fetcher`] trait.

pub mod archive;
pub mod batch;
mod cache;
pub mod config;
pub mod drafts;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod models;
pub mod search;
pub mod storage;
pub mod sync;
pub mod threads;

pub use archive::ArchiveManager;
pub use batch::BatchOperationManager;
pub use cache::MailCache;
pub use config::{SearchTokenizer, StoreConfig};
pub use drafts::DraftStore;
pub use error::{StateError, ValidationError, state_error};
pub use indexer::{ContentIndexer, IndexBatchReport};
pub use models::{
    Account, AnalyticsOverview, ArchiveReason, ArchivedEmail, BatchFilter, BatchOpStatus,
    BatchOperation, ContentIndexState, DailyCount, Draft, DraftFinalStatus, DraftHistoryEntry,
    DraftStatus, DraftUpdate, Email, EmailAddress, EmailPreview, EmailSummary, Folder,
    HourlyCount, IndexStatus, NewDraft, NewEmail, NewSentEmail, PendingBatchOp, ResponseStats,
    SendMethod, SenderStats, SentEmail, ServerChanges, WeekdayCount,
};
pub use search::{SearchIndex, SearchPath, SearchResults};
pub use storage::PersistentStore;
pub use sync::{Fetcher, SyncOptions, SyncReconciler, SyncStats};
pub use threads::{ThreadDetector, derive_thread_id, normalize_subject};
