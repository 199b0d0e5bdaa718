use std::time::Duration;

/// Configuration of the state cache and its background flush.
///
/// Controls where state is stored, how often dirty entries are persisted,
/// and how often message activity may earn rewards.
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// SQLite URL of the backing store, e.g. `sqlite://guildkeep.db`.
    pub database_url: String,
    /// Interval between background flushes of every write-back domain.
    pub flush_interval: Duration,
    /// Minimum time between engagement awards for one member of a guild.
    pub engagement_cooldown: Duration,
    /// Minimum time between message-triggered global currency awards for one user.
    pub currency_cooldown: Duration,
    /// Engagement points per qualifying message.
    pub engagement_per_message: i64,
    /// Global currency per qualifying message.
    pub currency_per_message: i64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://guildkeep.db".to_string(),
            flush_interval: Duration::from_secs(60),
            engagement_cooldown: Duration::from_secs(180),
            currency_cooldown: Duration::from_secs(60),
            engagement_per_message: 1,
            currency_per_message: 1,
        }
    }
}
