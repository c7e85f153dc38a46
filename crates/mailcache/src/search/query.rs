//! Query sanitizing for the FTS5 mirror
//!
//! User input is reduced to plain terms, each quoted, joined with OR so
//! that a multi-word query matches partially instead of as a phrase.

/// Characters with meaning in FTS5 query syntax; removed from terms
const STRIPPED: &[char] = &['"', '\'', '*', '(', ')', ':', '^', '{', '}', '[', ']', '+'];

/// Bare FTS5 operators; lowercased so they are taken as words
const OPERATORS: &[&str] = &["AND", "OR", "NOT", "NEAR"];

/// Shortest term the trigram tokenizer can match
pub const MIN_TRIGRAM_TERM: usize = 3;

/// Split a user query into sanitized terms.
pub fn sanitize_terms(query: &str) -> Vec<String> {
    let cleaned: String = query
        .chars()
        .filter(|c| !STRIPPED.contains(c))
        .map(|c| if c == '-' { ' ' } else { c })
        .collect();

    cleaned
        .split_whitespace()
        .map(|term| {
            if OPERATORS.contains(&term) {
                term.to_lowercase()
            } else {
                term.to_string()
            }
        })
        .collect()
}

/// Build an FTS5 MATCH expression, or `None` if no usable term remains.
///
/// With `min_term_chars` set, shorter terms are dropped (trigram mode).
pub fn match_expression(query: &str, min_term_chars: Option<usize>) -> Option<String> {
    let terms: Vec<String> = sanitize_terms(query)
        .into_iter()
        .filter(|t| min_term_chars.is_none_or(|min| t.chars().count() >= min))
        .map(|t| format!("\"{}\"", t))
        .collect();

    (!terms.is_empty()).then(|| terms.join(" OR "))
}

/// Escape `%`, `_` and `\` for a LIKE pattern using `ESCAPE '\'`.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
