//! Facade bundling the store with every component
//!
//! Hosts that want the whole engine open one [`MailCache`]; the components
//! share a single store handle.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::archive::ArchiveManager;
use crate::batch::BatchOperationManager;
use crate::config::StoreConfig;
use crate::drafts::DraftStore;
use crate::indexer::ContentIndexer;
use crate::search::SearchIndex;
use crate::storage::PersistentStore;
use crate::sync::SyncReconciler;
use crate::threads::ThreadDetector;

pub struct MailCache {
    pub store: Arc<PersistentStore>,
    pub sync: SyncReconciler,
    pub threads: ThreadDetector,
    pub search: SearchIndex,
    pub indexer: ContentIndexer,
    pub batch: BatchOperationManager,
    pub archive: ArchiveManager,
    pub drafts: DraftStore,
}

impl MailCache {
    /// Open the database at `db_path` with `config`.
    pub fn open(db_path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        Ok(Self::from_store(PersistentStore::open(db_path, config)?))
    }

    /// Load `mailcache.json` and open the database it names.
    pub fn open_configured() -> Result<Self> {
        let config = StoreConfig::load()?;
        Ok(Self::from_store(PersistentStore::open_configured(&config)?))
    }

    pub fn from_store(store: PersistentStore) -> Self {
        let store = Arc::new(store);
        Self {
            sync: SyncReconciler::new(store.clone()),
            threads: ThreadDetector::new(store.clone()),
            search: SearchIndex::new(store.clone()),
            indexer: ContentIndexer::new(store.clone()),
            batch: BatchOperationManager::new(store.clone()),
            archive: ArchiveManager::new(store.clone()),
            drafts: DraftStore::new(store.clone()),
            store,
        }
    }
}
