//! Outgoing drafts

mod store;

pub(crate) use store::load_draft;
pub use store::DraftStore;
