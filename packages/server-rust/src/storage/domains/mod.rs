//! Write-back state domains.
//!
//! Each domain pairs a [`Persister`](super::Persister) describing its rows
//! with a thin wrapper exposing domain operations over a
//! [`WriteBackTable`](super::WriteBackTable).

pub mod currency;
pub mod engagement;
pub mod greetings;
pub mod guild_settings;
pub mod profiles;
pub mod shop;

pub use currency::{CurrencyKey, CurrencyLedger, GlobalCurrency, GuildCurrency};
pub use engagement::{EngagementLedger, GlobalPoints};
pub use greetings::GreetingsTable;
pub use guild_settings::GuildSettingsTable;
pub use profiles::ProfileTable;
pub use shop::ShopInventory;

use crate::error::{StoreError, StoreResult};

/// Narrows an `INTEGER` column to the in-memory field type.
fn narrow<T: TryFrom<i64>>(domain: &'static str, column: &str, raw: i64) -> StoreResult<T> {
    T::try_from(raw).map_err(|_| StoreError::Corrupt {
        domain,
        detail: format!("{column} out of range: {raw}"),
    })
}
