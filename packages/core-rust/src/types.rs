//! Domain value types held by the state cache, with their documented defaults.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, GuildId};

// ---------------------------------------------------------------------------
// Guild settings
// ---------------------------------------------------------------------------

/// Embed accent colors as `0xRRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedColors {
    pub success: u32,
    pub error: u32,
    pub info: u32,
}

impl Default for EmbedColors {
    fn default() -> Self {
        Self {
            success: 0x00aa00,
            error: 0xaa0000,
            info: 0x0000aa,
        }
    }
}

/// Parameters for random currency drops on chat messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDrop {
    /// Chance in percent (0..=100) that an eligible message drops currency.
    pub chance_percent: u8,
    /// Smallest amount a drop can award.
    pub min_amount: i64,
    /// Largest amount a drop can award.
    pub max_amount: i64,
    /// Channels where drops can happen. Empty means nowhere.
    pub channels: Vec<ChannelId>,
}

impl Default for CurrencyDrop {
    fn default() -> Self {
        Self {
            chance_percent: 5,
            min_amount: 1,
            max_amount: 10,
            channels: Vec::new(),
        }
    }
}

impl CurrencyDrop {
    /// Rolls for a drop in `channel`.
    ///
    /// Returns the amount to award, or `None` when the channel is not eligible
    /// or the roll misses. The amount is uniform in `[min_amount, max_amount]`;
    /// an inverted range collapses to `min_amount`.
    pub fn roll<R: Rng>(&self, channel: ChannelId, rng: &mut R) -> Option<i64> {
        if self.chance_percent == 0 || !self.channels.contains(&channel) {
            return None;
        }
        if rng.random_range(0..100u8) >= self.chance_percent {
            return None;
        }
        if self.max_amount <= self.min_amount {
            return Some(self.min_amount);
        }
        Some(rng.random_range(self.min_amount..=self.max_amount))
    }
}

/// Per-guild bot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub colors: EmbedColors,
    /// Command prefix.
    pub prefix: String,
    /// Whether permission denials are reported back to the invoking user.
    pub show_permission_errors: bool,
    pub currency_drop: CurrencyDrop,
    /// Delete a banned member's stored state when they are banned.
    pub delete_on_ban: bool,
    /// Send command replies as embeds instead of plain text.
    pub reply_as_embed: bool,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            colors: EmbedColors::default(),
            prefix: "!".to_string(),
            show_permission_errors: true,
            currency_drop: CurrencyDrop::default(),
            delete_on_ban: false,
            reply_as_embed: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// Which currency ledger an amount belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CurrencyScope {
    /// Cross-guild currency owned by the user.
    Global,
    /// Currency local to one guild.
    Guild(GuildId),
}

impl fmt::Display for CurrencyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Guild(id) => write!(f, "guild {id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Shop
// ---------------------------------------------------------------------------

/// What a shop item grants when bought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Role,
    Title,
    Badge,
    Background,
}

impl ItemKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Title => "title",
            Self::Badge => "badge",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`ItemKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown shop item kind: {0}")]
pub struct UnknownItemKind(pub String);

impl FromStr for ItemKind {
    type Err = UnknownItemKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "role" => Ok(Self::Role),
            "title" => Ok(Self::Title),
            "badge" => Ok(Self::Badge),
            "background" => Ok(Self::Background),
            other => Err(UnknownItemKind(other.to_string())),
        }
    }
}

/// One entry in a guild's shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopItem {
    pub kind: ItemKind,
    /// Kind-specific payload: a role id, title text, badge name or background name.
    pub data: String,
    pub cost: i64,
}

impl ShopItem {
    #[must_use]
    pub fn new(kind: ItemKind, data: impl Into<String>, cost: i64) -> Self {
        Self {
            kind,
            data: data.into(),
            cost,
        }
    }
}

// ---------------------------------------------------------------------------
// Greetings
// ---------------------------------------------------------------------------

/// Placeholder replaced with the member mention when a greeting is rendered.
pub const USER_PLACEHOLDER: &str = "{user}";
/// Placeholder replaced with the guild name when a greeting is rendered.
pub const SERVER_PLACEHOLDER: &str = "{server}";

/// A welcome or goodbye message template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    /// Template text containing `{user}` / `{server}` placeholders.
    pub text: String,
    /// Channel to post in. `None` disables the greeting.
    pub channel_id: Option<ChannelId>,
    /// Delete the posted message after this many seconds. `None` keeps it.
    pub delete_after_secs: Option<u32>,
}

impl Greeting {
    fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            channel_id: None,
            delete_after_secs: None,
        }
    }

    /// Substitutes the placeholders in the template.
    #[must_use]
    pub fn render(&self, user: &str, server: &str) -> String {
        self.text
            .replace(USER_PLACEHOLDER, user)
            .replace(SERVER_PLACEHOLDER, server)
    }

    /// Whether the greeting has a destination channel.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.channel_id.is_some()
    }
}

/// Welcome and goodbye configuration of one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greetings {
    pub welcome: Greeting,
    pub goodbye: Greeting,
}

impl Default for Greetings {
    fn default() -> Self {
        Self {
            welcome: Greeting::with_text("Welcome {user} to {server}!"),
            goodbye: Greeting::with_text("{user} has left {server}."),
        }
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Cosmetic profile of a user, shared across guilds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Currently displayed title.
    pub title: Option<String>,
    pub owned_titles: Vec<String>,
    /// Currently displayed badges.
    pub badges: Vec<String>,
    pub owned_badges: Vec<String>,
    pub background: Option<String>,
}

impl Profile {
    /// Records ownership of a cosmetic. Returns `false` if already owned or
    /// the kind is not a profile cosmetic.
    pub fn grant(&mut self, kind: ItemKind, data: &str) -> bool {
        let owned = match kind {
            ItemKind::Title => &mut self.owned_titles,
            ItemKind::Badge => &mut self.owned_badges,
            ItemKind::Role | ItemKind::Background => return false,
        };
        if owned.iter().any(|o| o == data) {
            return false;
        }
        owned.push(data.to_string());
        true
    }

    /// Displays `title` if owned. Returns whether the title changed.
    pub fn equip_title(&mut self, title: &str) -> bool {
        if !self.owned_titles.iter().any(|t| t == title) {
            return false;
        }
        self.title = Some(title.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn guild_settings_defaults() {
        let s = GuildSettings::default();
        assert_eq!(s.colors.success, 0x00aa00);
        assert_eq!(s.colors.error, 0xaa0000);
        assert_eq!(s.colors.info, 0x0000aa);
        assert_eq!(s.prefix, "!");
        assert!(s.show_permission_errors);
        assert!(!s.delete_on_ban);
        assert!(!s.reply_as_embed);
        assert!(s.currency_drop.channels.is_empty());
    }

    #[test]
    fn currency_drop_ignores_ineligible_channel() {
        let drop = CurrencyDrop {
            chance_percent: 100,
            ..CurrencyDrop::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(drop.roll(ChannelId(1), &mut rng), None);
    }

    #[test]
    fn currency_drop_always_hits_at_full_chance() {
        let drop = CurrencyDrop {
            chance_percent: 100,
            min_amount: 3,
            max_amount: 8,
            channels: vec![ChannelId(1)],
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let amount = drop.roll(ChannelId(1), &mut rng).unwrap();
            assert!((3..=8).contains(&amount));
        }
    }

    #[test]
    fn currency_drop_never_hits_at_zero_chance() {
        let drop = CurrencyDrop {
            chance_percent: 0,
            channels: vec![ChannelId(1)],
            ..CurrencyDrop::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        assert!((0..50).all(|_| drop.roll(ChannelId(1), &mut rng).is_none()));
    }

    #[test]
    fn currency_drop_inverted_range_uses_min() {
        let drop = CurrencyDrop {
            chance_percent: 100,
            min_amount: 9,
            max_amount: 2,
            channels: vec![ChannelId(1)],
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(drop.roll(ChannelId(1), &mut rng), Some(9));
    }

    #[test]
    fn item_kind_round_trips_through_text() {
        for kind in [ItemKind::Role, ItemKind::Title, ItemKind::Badge, ItemKind::Background] {
            assert_eq!(kind.as_str().parse::<ItemKind>().unwrap(), kind);
        }
        assert!("sword".parse::<ItemKind>().is_err());
    }

    #[test]
    fn greeting_render_substitutes_placeholders() {
        let g = Greetings::default();
        assert_eq!(g.welcome.render("@ann", "Rustaceans"), "Welcome @ann to Rustaceans!");
        assert_eq!(g.goodbye.render("@ann", "Rustaceans"), "@ann has left Rustaceans.");
        assert!(!g.welcome.is_enabled());
    }

    #[test]
    fn profile_grant_is_idempotent() {
        let mut p = Profile::default();
        assert!(p.grant(ItemKind::Title, "Champion"));
        assert!(!p.grant(ItemKind::Title, "Champion"));
        assert!(!p.grant(ItemKind::Role, "123"));
        assert_eq!(p.owned_titles, vec!["Champion".to_string()]);
    }

    #[test]
    fn profile_equips_only_owned_titles() {
        let mut p = Profile::default();
        assert!(!p.equip_title("Champion"));
        p.grant(ItemKind::Title, "Champion");
        assert!(p.equip_title("Champion"));
        assert_eq!(p.title.as_deref(), Some("Champion"));
    }
}
