//! Background body indexing

mod content;

pub use content::{ContentIndexer, IndexBatchReport, IndexCandidate, SPEED_RANGE};
