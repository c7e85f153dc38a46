//! The remote side of a sync, as seen by this crate

use anyhow::Result;

use crate::models::NewEmail;

/// Source of remote mailbox data (an IMAP or API client).
///
/// Implementations do the network I/O and MIME decoding; everything they
/// return is already plain text.
pub trait Fetcher {
    /// Complete list of remote UIDs in a folder.
    ///
    /// `None` (or an empty list) means the listing is unknown, and no
    /// local rows are purged because of it.
    fn list_remote_uids(&self, folder: &str) -> Result<Option<Vec<u32>>>;

    /// Envelopes for the given UIDs. UIDs that vanished remotely are omitted.
    fn fetch_envelopes(&self, folder: &str, uids: &[u32]) -> Result<Vec<NewEmail>>;

    /// Decoded plain-text body of one message, if it has one.
    fn fetch_body_text(&self, folder: &str, uid: u32) -> Result<Option<String>>;
}
