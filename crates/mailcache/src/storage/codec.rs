//! Encoding at the storage edge
//!
//! Timestamps are fixed-width RFC 3339 UTC strings so that lexical and
//! chronological order agree. Repeated fields are stored as a versioned
//! JSON envelope. HTML bodies are zstd-compressed.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::{Type, ValueRef};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::EmailAddress;

/// zstd compression level for stored bodies
const COMPRESSION_LEVEL: i32 = 3;

/// Current version of the list envelope
pub(crate) const LIST_VERSION: u32 = 1;

pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_ts() -> String {
    ts(&Utc::now())
}

/// Parse a stored timestamp. Accepts RFC 3339 and SQLite's
/// `YYYY-MM-DD HH:MM:SS` (rows written by `CURRENT_TIMESTAMP`).
pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| ValidationError::Timestamp(s.to_string()))
}

/// Timestamp column; a malformed value is a conversion error on `idx`.
pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Nullable timestamp column.
pub(crate) fn ts_col_opt(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.as_deref()
        .map(parse_ts)
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[derive(Serialize)]
struct ListOut<'a, T> {
    v: u32,
    items: &'a [T],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListIn<T> {
    Versioned { v: u32, items: Vec<T> },
    Bare(Vec<T>),
}

/// Encode a repeated field as `{"v":1,"items":[...]}`.
pub(crate) fn encode_list<T: Serialize>(items: &[T]) -> Result<String> {
    serde_json::to_string(&ListOut {
        v: LIST_VERSION,
        items,
    })
    .context("Failed to encode list column")
}

/// Decode a repeated field. Empty text is an empty list; a bare JSON array
/// is accepted as the unversioned legacy form.
pub(crate) fn decode_list<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<ListIn<T>>(raw).context("Failed to decode list column")? {
        ListIn::Versioned { v, items } if v <= LIST_VERSION => Ok(items),
        ListIn::Versioned { v, .. } => Err(ValidationError::UnsupportedVersion(v).into()),
        ListIn::Bare(items) => Ok(items),
    }
}

/// Decode a list column, logging and returning an empty list on failure.
pub(crate) fn decode_list_lossy<T: DeserializeOwned>(raw: Option<&str>, column: &str) -> Vec<T> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    decode_list(raw).unwrap_or_else(|e| {
        log::warn!("[STORE] Could not decode {}: {:#}", column, e);
        Vec::new()
    })
}

/// Decode a recipient column. Besides the JSON forms, accepts a plain
/// comma-separated header value.
pub(crate) fn decode_addresses(raw: Option<&str>) -> Vec<EmailAddress> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Vec::new();
    };
    if raw.starts_with('{') || raw.starts_with('[') {
        return decode_list_lossy(Some(raw), "recipients");
    }
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(EmailAddress::parse)
        .collect()
}

pub(crate) fn compress_text(text: &str) -> Result<Vec<u8>> {
    zstd::encode_all(text.as_bytes(), COMPRESSION_LEVEL).context("Failed to compress body")
}

pub(crate) fn decompress_text(data: &[u8]) -> Result<String> {
    let bytes = zstd::decode_all(data).context("Failed to decompress body")?;
    String::from_utf8(bytes).context("Stored body is not valid UTF-8")
}

/// Read a body column that may be a compressed blob or legacy plain text.
pub(crate) fn body_from_value(value: ValueRef<'_>) -> Result<Option<String>> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(data) => decompress_text(data).map(Some),
        ValueRef::Text(text) => Ok(Some(String::from_utf8_lossy(text).into_owned())),
        other => anyhow::bail!("Unexpected body column type: {:?}", other.data_type()),
    }
}

pub(crate) fn bool_col(v: i64) -> bool {
    v != 0
}
