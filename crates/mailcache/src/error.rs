//! Domain errors
//!
//! Operations return `anyhow::Result`; these types travel inside the
//! `anyhow::Error` and can be recovered with `downcast_ref`.

use thiserror::Error;

/// An operation was attempted from a state that does not allow it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("batch operation {id} cannot {action} while {status}")]
    BatchOp {
        id: i64,
        status: String,
        action: &'static str,
    },

    #[error("content indexer for account {account_id} cannot {action} while {status}")]
    Indexer {
        account_id: i64,
        status: String,
        action: &'static str,
    },

    #[error("draft {id} cannot {action} while {status}")]
    Draft {
        id: i64,
        status: String,
        action: &'static str,
    },
}

/// Input or stored data that cannot be accepted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("batch filter has no criteria")]
    EmptyFilter,

    #[error("no emails match {0}")]
    EmptySelection(String),

    #[error("unknown {kind} value: {value:?}")]
    UnknownValue { kind: &'static str, value: String },

    #[error("unsupported encoding version {0}")]
    UnsupportedVersion(u32),

    #[error("unparseable timestamp {0:?}")]
    Timestamp(String),
}

impl ValidationError {
    pub(crate) fn unknown(kind: &'static str, value: &str) -> Self {
        Self::UnknownValue {
            kind,
            value: value.to_string(),
        }
    }
}

/// Returns the [`StateError`] carried by an `anyhow::Error`, if any.
pub fn state_error(err: &anyhow::Error) -> Option<&StateError> {
    err.downcast_ref::<StateError>()
}
