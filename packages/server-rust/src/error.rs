//! Error types for the persistence layer and for foreground state operations.

use guildkeep_core::permission::RuleParseError;
use guildkeep_core::{CurrencyScope, GuildId};

/// Errors raised while talking to the backing store.
///
/// Flush and hydration paths return these; the flush scheduler logs them and
/// keeps running. Only [`StoreError::Migration`] is allowed to abort startup.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration {version} ({name}) failed: {source}")]
    Migration {
        version: u32,
        name: &'static str,
        source: sqlx::Error,
    },
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("corrupt rule #{index} for guild {guild}: {source}")]
    CorruptRule {
        guild: GuildId,
        index: usize,
        source: RuleParseError,
    },
    #[error("corrupt {domain} row: {detail}")]
    Corrupt { domain: &'static str, detail: String },
}

impl StoreError {
    /// Whether this is a primary-key / unique constraint violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(err) => err
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation()),
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned to command handlers by state mutators.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A debit was refused; nothing was changed.
    #[error("not enough {scope} currency: have {held}, need {needed}")]
    InsufficientFunds {
        scope: CurrencyScope,
        held: i64,
        needed: i64,
    },
    #[error("no entry at index {index} (length {len})")]
    IndexOutOfRange { index: usize, len: usize },
    /// A rule whose text form would not load back; nothing was stored.
    #[error("invalid rule: {0}")]
    InvalidRule(#[from] RuleParseError),
    /// The change would overflow a 64-bit counter; nothing was changed.
    #[error("{domain} value overflow")]
    Overflow { domain: &'static str },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for StateError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}
