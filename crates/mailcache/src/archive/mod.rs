//! Append-only history: archived emails, finished drafts, sent mail

mod manager;

pub use manager::ArchiveManager;
