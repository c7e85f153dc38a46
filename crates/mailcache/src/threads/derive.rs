//! Header-only conversation identity
//!
//! Pure functions; no storage access.

use std::sync::LazyLock;

use regex::Regex;

/// Reply/forward prefixes in the languages we see most: English, German
/// (AW, WG), Scandinavian (SV), Portuguese (RES, ENC), French (TR).
/// Gmail-style counters such as `Re[2]:` are included.
static REPLY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(re|fwd|fw|aw|sv|ref|res|enc|wg|tr)\s*(\[\d+\])?\s*:\s*")
        .expect("reply prefix pattern is valid")
});

/// Prefix of thread ids derived from the subject line
pub const SUBJECT_THREAD_PREFIX: &str = "subject:";

/// Strip reply/forward prefixes, collapse whitespace and lowercase.
///
/// `normalize_subject(normalize_subject(s)) == normalize_subject(s)`.
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject.trim();
    while let Some(m) = REPLY_PREFIX.find(rest) {
        rest = rest[m.end()..].trim_start();
    }
    rest.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Strip angle brackets and whitespace, lowercase. `None` if nothing is left.
pub fn clean_message_id(id: &str) -> Option<String> {
    let cleaned = id
        .trim_matches(|c: char| c == '<' || c == '>' || c.is_whitespace())
        .to_lowercase();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Split a References header into cleaned ids, oldest first.
pub fn parse_references(references: &str) -> Vec<String> {
    references
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(clean_message_id)
        .collect()
}

/// Derive a thread id from headers, in priority order:
/// 1. the In-Reply-To id
/// 2. the first References entry (the thread root)
/// 3. the message's own id (a new thread)
/// 4. `subject:` + the normalized subject
///
/// The subject fallback joins unrelated conversations that share a
/// subject line ("Status update"). That is a known limitation.
pub fn derive_thread_id(
    message_id: Option<&str>,
    in_reply_to: Option<&str>,
    references: Option<&str>,
    subject: &str,
) -> String {
    if let Some(parent) = in_reply_to.and_then(clean_message_id) {
        return parent;
    }
    if let Some(root) = references.and_then(|r| parse_references(r).into_iter().next()) {
        return root;
    }
    if let Some(own) = message_id.and_then(clean_message_id) {
        return own;
    }
    format!("{}{}", SUBJECT_THREAD_PREFIX, normalize_subject(subject))
}
