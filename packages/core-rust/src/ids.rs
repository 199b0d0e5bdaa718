//! Typed snowflake identifiers.
//!
//! Every id the chat platform hands us is a 64-bit snowflake. Wrapping each
//! kind in its own newtype keeps a channel id from ever being compared with
//! a role id, which matters most inside the permission rule chain.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! snowflake_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the raw snowflake value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Bit-casts to `i64` for storage in a SQLite `INTEGER` column.
            #[must_use]
            #[allow(clippy::cast_possible_wrap)]
            pub const fn to_db(self) -> i64 {
                self.0 as i64
            }

            /// Inverse of [`to_db`](Self::to_db).
            #[must_use]
            #[allow(clippy::cast_sign_loss)]
            pub const fn from_db(raw: i64) -> Self {
                Self(raw as u64)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self)
            }
        }
    };
}

snowflake_id!(
    /// A tenant: one chat-platform server.
    GuildId
);

snowflake_id!(
    /// An end user of the chat platform.
    UserId
);

snowflake_id!(
    /// A text channel inside a guild.
    ChannelId
);

snowflake_id!(
    /// A role that can be assigned to guild members.
    RoleId
);

snowflake_id!(
    /// A channel category grouping several channels.
    CategoryId
);
