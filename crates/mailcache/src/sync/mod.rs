//! Sync between the remote mailbox and the local cache

mod fetcher;
mod reconciler;

#[cfg(test)]
pub(crate) mod fake;

pub use fetcher::Fetcher;
pub use reconciler::{SyncOptions, SyncReconciler, SyncStats};
