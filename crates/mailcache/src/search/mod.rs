//! Full-text search over cached emails
//!
//! - `index`: [`SearchIndex`], indexed and fallback queries, mirror upkeep
//! - `query`: sanitizing user input into FTS5 match expressions

mod index;
mod query;

pub use index::{MIN_INDEXED_QUERY, SearchIndex, SearchPath, SearchResults};
pub use query::{escape_like, match_expression, sanitize_terms};
