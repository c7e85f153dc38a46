//! Persistent storage
//!
//! - `sqlite`: the store handle, accounts, folders, settings, sync log
//! - `emails`: email reads and flag updates
//! - `analytics`: overview counts, top senders, time buckets, response stats
//! - `schema`: versioned migrations and additive columns
//! - `fts`: the full-text mirror and its triggers
//! - `codec`: timestamp, list and body encoding at the storage edge

mod analytics;
pub(crate) mod codec;
mod emails;
pub(crate) mod fts;
pub(crate) mod schema;
mod sqlite;

pub(crate) use emails::{SUMMARY_COLUMNS, load_email, select_list, set_flag, summary_from_row};
pub use sqlite::PersistentStore;

#[cfg(test)]
pub(crate) use sqlite::tests::create_test_store;
