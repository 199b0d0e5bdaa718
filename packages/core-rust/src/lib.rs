//! `guildkeep` core: typed ids, domain values, permission rules and their evaluator.

pub mod context;
pub mod ids;
pub mod permission;
pub mod types;

pub use context::InvocationContext;
pub use ids::{CategoryId, ChannelId, GuildId, RoleId, UserId};
pub use permission::{evaluate, Denial, Rule, Scope, Target, Verdict};
pub use types::{
    CurrencyDrop, CurrencyScope, EmbedColors, Greeting, Greetings, GuildSettings, ItemKind,
    Profile, ShopItem,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
