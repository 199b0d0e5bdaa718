//! The state cache: every domain behind one handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use guildkeep_core::permission::Denial;
use guildkeep_core::{ChannelId, GuildId, UserId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{error, info, warn};

use super::config::StateConfig;
use super::cooldown::Cooldown;
use super::gate::PermissionGate;
use crate::error::StoreResult;
use crate::storage::domains::{
    CurrencyLedger, EngagementLedger, GlobalCurrency, GreetingsTable, GuildCurrency,
    GuildSettingsTable, ProfileTable, ShopInventory,
};
use crate::storage::write_through::{AutoRoleStore, Blacklist, RuleStore};
use crate::storage::{BackingStore, FlushReport, Flushable};

/// A domain whose flush failed. Its dirty keys are retried next cycle.
#[derive(Debug, Clone, Serialize)]
pub struct FlushFailure {
    pub domain: &'static str,
    pub error: String,
}

/// Result of flushing every write-back domain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushSummary {
    pub reports: Vec<FlushReport>,
    pub failures: Vec<FlushFailure>,
}

impl FlushSummary {
    #[must_use]
    pub fn written(&self) -> usize {
        self.reports.iter().map(|r| r.written).sum()
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Rewards granted for one chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Accrual {
    /// New per-guild engagement total, if points were awarded.
    pub engagement: Option<i64>,
    /// New global balance, if currency was awarded.
    pub global_currency: Option<i64>,
    /// Amount of guild currency dropped, if the drop roll hit.
    pub guild_drop: Option<i64>,
}

impl Accrual {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Owns every state domain and the backing store they share.
pub struct StateCache {
    config: StateConfig,
    store: BackingStore,
    guild_settings: GuildSettingsTable,
    engagement: EngagementLedger,
    global_currency: CurrencyLedger<GlobalCurrency>,
    guild_currency: CurrencyLedger<GuildCurrency>,
    shop: ShopInventory,
    greetings: GreetingsTable,
    profiles: ProfileTable,
    rules: Arc<RuleStore>,
    auto_roles: AutoRoleStore,
    blacklist: Arc<Blacklist>,
    engagement_cooldown: Cooldown<(GuildId, UserId)>,
    currency_cooldown: Cooldown<UserId>,
}

impl StateCache {
    /// Opens the configured database, migrates it and hydrates every domain.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened, a migration fails, or stored
    /// state cannot be decoded. None of these may be ignored at startup.
    pub async fn open(config: StateConfig) -> StoreResult<Self> {
        let store = BackingStore::connect(&config.database_url).await?;
        Self::with_store(store, config).await
    }

    /// Like [`open`](Self::open) over an already connected store.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub async fn with_store(store: BackingStore, config: StateConfig) -> StoreResult<Self> {
        let applied = store.load().await?;
        let pool = store.pool().clone();

        let cache = Self {
            guild_settings: GuildSettingsTable::new(pool.clone()),
            engagement: EngagementLedger::new(pool.clone()),
            global_currency: CurrencyLedger::new(pool.clone()),
            guild_currency: CurrencyLedger::new(pool.clone()),
            shop: ShopInventory::new(pool.clone()),
            greetings: GreetingsTable::new(pool.clone()),
            profiles: ProfileTable::new(pool.clone()),
            rules: Arc::new(RuleStore::new(pool.clone())),
            auto_roles: AutoRoleStore::new(pool.clone()),
            blacklist: Arc::new(Blacklist::new(pool)),
            engagement_cooldown: Cooldown::new(config.engagement_cooldown),
            currency_cooldown: Cooldown::new(config.currency_cooldown),
            config,
            store,
        };

        cache.guild_settings.table().load().await?;
        cache.engagement.table().load().await?;
        cache.global_currency.table().load().await?;
        cache.guild_currency.table().load().await?;
        cache.shop.table().load().await?;
        cache.greetings.table().load().await?;
        cache.profiles.table().load().await?;
        cache.rules.load().await?;
        cache.auto_roles.load().await?;
        cache.blacklist.load().await?;

        info!(
            migrations_applied = applied,
            blacklisted = cache.blacklist.len(),
            "State cache ready"
        );
        Ok(cache)
    }

    #[must_use]
    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &BackingStore {
        &self.store
    }

    #[must_use]
    pub fn guild_settings(&self) -> &GuildSettingsTable {
        &self.guild_settings
    }

    #[must_use]
    pub fn engagement(&self) -> &EngagementLedger {
        &self.engagement
    }

    #[must_use]
    pub fn global_currency(&self) -> &CurrencyLedger<GlobalCurrency> {
        &self.global_currency
    }

    #[must_use]
    pub fn guild_currency(&self) -> &CurrencyLedger<GuildCurrency> {
        &self.guild_currency
    }

    #[must_use]
    pub fn shop(&self) -> &ShopInventory {
        &self.shop
    }

    #[must_use]
    pub fn greetings(&self) -> &GreetingsTable {
        &self.greetings
    }

    #[must_use]
    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    #[must_use]
    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    #[must_use]
    pub fn auto_roles(&self) -> &AutoRoleStore {
        &self.auto_roles
    }

    #[must_use]
    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Gate sharing this cache's rule chains and blacklist.
    #[must_use]
    pub fn gate(&self) -> PermissionGate {
        PermissionGate::new(Arc::clone(&self.rules), Arc::clone(&self.blacklist))
    }

    fn flushables(&self) -> [&dyn Flushable; 7] {
        [
            self.guild_settings.table(),
            self.engagement.table(),
            self.global_currency.table(),
            self.guild_currency.table(),
            self.shop.table(),
            self.greetings.table(),
            self.profiles.table(),
        ]
    }

    /// Flushes every write-back domain in turn. A failing domain is logged
    /// and recorded; the remaining domains are still flushed.
    pub async fn flush_all(&self) -> FlushSummary {
        let mut summary = FlushSummary::default();
        for table in self.flushables() {
            match table.flush().await {
                Ok(report) => summary.reports.push(report),
                Err(err) => summary.failures.push(FlushFailure {
                    domain: table.domain(),
                    error: err.to_string(),
                }),
            }
        }
        if !summary.is_ok() {
            error!(failed = summary.failures.len(), "Flush cycle incomplete");
        }
        summary
    }

    /// Keys waiting for the next flush, per domain.
    pub async fn dirty_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for table in self.flushables() {
            counts.insert(table.domain(), table.dirty_len().await);
        }
        counts
    }

    /// Forgets cooldown entries whose window has passed.
    pub fn purge_cooldowns(&self) -> usize {
        self.engagement_cooldown.purge_expired() + self.currency_cooldown.purge_expired()
    }

    /// Applies the per-message rewards for `user` posting in `channel`.
    pub async fn record_message(&self, guild: GuildId, user: UserId, channel: ChannelId) -> Accrual {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        self.record_message_with(guild, user, channel, &mut rng).await
    }

    /// [`record_message`](Self::record_message) with a caller-supplied RNG
    /// for the guild currency drop.
    pub async fn record_message_with<R: Rng + Send>(
        &self,
        guild: GuildId,
        user: UserId,
        channel: ChannelId,
        rng: &mut R,
    ) -> Accrual {
        let mut accrual = Accrual::default();
        if self.blacklist.contains(user) {
            return accrual;
        }

        if self.engagement_cooldown.try_acquire(&(guild, user)) {
            match self
                .engagement
                .award(guild, user, self.config.engagement_per_message)
                .await
            {
                Ok(total) => accrual.engagement = Some(total),
                Err(err) => warn!(%guild, %user, error = %err, "Engagement not awarded"),
            }
        }
        if self.currency_cooldown.try_acquire(&user) {
            match self
                .global_currency
                .award(user, self.config.currency_per_message)
                .await
            {
                Ok(balance) => accrual.global_currency = Some(balance),
                Err(err) => warn!(%user, error = %err, "Currency not awarded"),
            }
        }

        let drop = self.guild_settings.settings(guild).await.currency_drop;
        if let Some(amount) = drop.roll(channel, rng) {
            match self.guild_currency.award((guild, user), amount).await {
                Ok(_) => accrual.guild_drop = Some(amount),
                Err(err) => warn!(%guild, %user, error = %err, "Currency drop not awarded"),
            }
        }
        accrual
    }

    /// Text shown to the user for a denial, or `None` if the guild hides
    /// permission errors.
    pub async fn denial_message(&self, guild: GuildId, denial: &Denial) -> Option<String> {
        self.guild_settings
            .settings(guild)
            .await
            .show_permission_errors
            .then(|| denial.to_string())
    }
}
