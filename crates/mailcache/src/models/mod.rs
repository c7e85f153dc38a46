//! Domain models

/// Declares a status-like enum stored as lowercase text, with `as_str`,
/// `Display` and a `FromStr` that reports unknown values.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(crate::error::ValidationError::unknown(stringify!($name), other)),
                }
            }
        }
    };
}

mod account;
mod analytics;
mod archive;
mod batch_op;
mod draft;
mod email;
mod index_state;

pub use account::{Account, Folder, TRASH_SPAM_PATTERNS};
pub use analytics::{
    AnalyticsOverview, DailyCount, HourlyCount, ResponseStats, SenderStats, WeekdayCount,
};
pub use archive::{
    ArchiveReason, ArchivedEmail, DraftFinalStatus, DraftHistoryEntry, NewSentEmail, SendMethod,
    SentEmail,
};
pub use batch_op::{BatchFilter, BatchOpStatus, BatchOperation, EmailPreview, PendingBatchOp};
pub use draft::{Draft, DraftStatus, DraftUpdate, NewDraft};
pub use email::{Email, EmailAddress, EmailSummary, NewEmail, NewEmailBuilder, ServerChanges};
pub use index_state::{ContentIndexState, IndexStatus};
