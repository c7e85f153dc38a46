//! Conversation threading from message headers

mod derive;
mod detector;

pub use derive::{
    SUBJECT_THREAD_PREFIX, clean_message_id, derive_thread_id, normalize_subject, parse_references,
};
pub use detector::ThreadDetector;
