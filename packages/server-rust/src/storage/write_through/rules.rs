//! Per-guild permission rule chains.
//!
//! Read on every command dispatch, so reads are lock-free snapshots from a
//! `DashMap`. Every mutator rewrites the guild's rows in one transaction and
//! only then publishes the new chain in memory; a failed write leaves both
//! sides unchanged.

use std::sync::Arc;

use dashmap::DashMap;
use guildkeep_core::permission::{default_chain, Rule};
use guildkeep_core::GuildId;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{StateError, StoreError, StoreResult};

pub struct RuleStore {
    pool: SqlitePool,
    chains: DashMap<GuildId, Arc<Vec<Rule>>>,
    default: Arc<Vec<Rule>>,
    /// Serializes writers so read-modify-write of a chain is atomic.
    write_lock: Mutex<()>,
}

impl RuleStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            chains: DashMap::new(),
            default: Arc::new(default_chain()),
            write_lock: Mutex::new(()),
        }
    }

    /// Loads every stored chain.
    ///
    /// # Errors
    ///
    /// [`StoreError::CorruptRule`] if any stored rule text does not parse.
    /// An unreadable chain is never replaced by a default.
    pub async fn load(&self) -> StoreResult<usize> {
        let rows = sqlx::query(
            "SELECT guild_id, position, rule FROM permission_rules ORDER BY guild_id, position",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut loaded: Vec<(GuildId, Vec<Rule>)> = Vec::new();
        for row in &rows {
            let guild = GuildId::from_db(row.try_get("guild_id")?);
            let text: &str = row.try_get("rule")?;
            if !matches!(loaded.last(), Some((g, _)) if *g == guild) {
                loaded.push((guild, Vec::new()));
            }
            if let Some((_, chain)) = loaded.last_mut() {
                let rule = text.parse::<Rule>().map_err(|source| StoreError::CorruptRule {
                    guild,
                    index: chain.len(),
                    source,
                })?;
                chain.push(rule);
            }
        }

        let guilds = loaded.len();
        for (guild, chain) in loaded {
            self.chains.insert(guild, Arc::new(chain));
        }
        info!(guilds, rules = rows.len(), "Loaded permission chains");
        Ok(guilds)
    }

    /// The chain of `guild`, or the default chain if none was ever stored.
    #[must_use]
    pub fn get(&self, guild: GuildId) -> Arc<Vec<Rule>> {
        self.chains
            .get(&guild)
            .map_or_else(|| Arc::clone(&self.default), |chain| Arc::clone(chain.value()))
    }

    /// Appends `rule` as the new highest-priority rule. Returns its index.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidRule`] if the rule would not load back from
    /// storage, or a store error.
    pub async fn append(&self, guild: GuildId, rule: Rule) -> Result<usize, StateError> {
        rule.validate()?;
        let _guard = self.write_lock.lock().await;
        let mut chain = self.get(guild).as_ref().clone();
        chain.push(rule);
        let index = chain.len() - 1;
        self.publish(guild, chain).await?;
        Ok(index)
    }

    /// Removes the rule at `index`. Every later rule moves down one index.
    ///
    /// # Errors
    ///
    /// [`StateError::IndexOutOfRange`] for a bad index, or a store error.
    pub async fn remove_at(&self, guild: GuildId, index: usize) -> Result<Rule, StateError> {
        let _guard = self.write_lock.lock().await;
        let mut chain = self.get(guild).as_ref().clone();
        if index >= chain.len() {
            return Err(StateError::IndexOutOfRange {
                index,
                len: chain.len(),
            });
        }
        let removed = chain.remove(index);
        self.publish(guild, chain).await?;
        Ok(removed)
    }

    /// Replaces the whole chain. Either every rule is stored or none is.
    ///
    /// # Errors
    ///
    /// [`StateError::InvalidRule`] if any rule would not load back from
    /// storage, or a store error.
    pub async fn replace_all(&self, guild: GuildId, rules: Vec<Rule>) -> Result<(), StateError> {
        rules.iter().try_for_each(Rule::validate)?;
        let _guard = self.write_lock.lock().await;
        Ok(self.publish(guild, rules).await?)
    }

    /// Resets the chain to the single allow-everything rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain cannot be persisted.
    pub async fn clear(&self, guild: GuildId) -> Result<(), StateError> {
        self.replace_all(guild, default_chain()).await
    }

    async fn publish(&self, guild: GuildId, chain: Vec<Rule>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM permission_rules WHERE guild_id = ?")
            .bind(guild.to_db())
            .execute(&mut *tx)
            .await?;
        for (position, rule) in (0_i64..).zip(&chain) {
            sqlx::query("INSERT INTO permission_rules (guild_id, position, rule) VALUES (?, ?, ?)")
                .bind(guild.to_db())
                .bind(position)
                .bind(rule.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.chains.insert(guild, Arc::new(chain));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use guildkeep_core::permission::RuleParseError;
    use guildkeep_core::{ChannelId, Scope};

    use super::*;
    use crate::storage::test_support::migrated_store;

    fn stored_rules(rows: Vec<(i64, String)>) -> Vec<String> {
        rows.into_iter().map(|(_, rule)| rule).collect()
    }

    async fn persisted(store: &crate::storage::BackingStore, guild: i64) -> Vec<String> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT position, rule FROM permission_rules WHERE guild_id = ? ORDER BY position",
        )
        .bind(guild)
        .fetch_all(store.pool())
        .await
        .unwrap();
        stored_rules(rows)
    }

    #[tokio::test]
    async fn unknown_guild_gets_default_chain() {
        let store = migrated_store().await;
        let rules = RuleStore::new(store.pool().clone());
        assert_eq!(*rules.get(GuildId(1)), vec![Rule::allow_all()]);
        assert!(persisted(&store, 1).await.is_empty());
    }

    #[tokio::test]
    async fn mutators_write_through_before_returning() {
        let store = migrated_store().await;
        let rules = RuleStore::new(store.pool().clone());
        let guild = GuildId(9);

        let index = rules
            .append(guild, Rule::all(Scope::Server, false))
            .await
            .unwrap();
        assert_eq!(index, 1);
        rules
            .append(guild, Rule::command(Scope::Channel(ChannelId(5)), "ping", true))
            .await
            .unwrap();
        assert_eq!(
            persisted(&store, 9).await,
            vec!["all-server enable", "all-server disable", "channel-command enable ping 5"]
        );

        let removed = rules.remove_at(guild, 1).await.unwrap();
        assert_eq!(removed, Rule::all(Scope::Server, false));
        assert_eq!(
            persisted(&store, 9).await,
            vec!["all-server enable", "channel-command enable ping 5"]
        );
    }

    #[tokio::test]
    async fn remove_out_of_range_changes_nothing() {
        let store = migrated_store().await;
        let rules = RuleStore::new(store.pool().clone());
        let err = rules.remove_at(GuildId(1), 3).await.unwrap_err();
        assert!(matches!(err, StateError::IndexOutOfRange { index: 3, len: 1 }));
        assert!(persisted(&store, 1).await.is_empty());
    }

    #[tokio::test]
    async fn clear_resets_to_allow_all() {
        let store = migrated_store().await;
        let rules = RuleStore::new(store.pool().clone());
        rules
            .replace_all(GuildId(2), vec![Rule::all(Scope::Server, false)])
            .await
            .unwrap();
        rules.clear(GuildId(2)).await.unwrap();
        assert_eq!(*rules.get(GuildId(2)), vec![Rule::allow_all()]);
        assert_eq!(persisted(&store, 2).await, vec!["all-server enable"]);
    }

    #[tokio::test]
    async fn chains_reload_in_order() {
        let store = migrated_store().await;
        let rules = RuleStore::new(store.pool().clone());
        let chain = vec![
            Rule::all(Scope::Server, false),
            Rule::module(Scope::Server, "economy", true),
            Rule::command(Scope::Server, "ping", false),
        ];
        rules.replace_all(GuildId(3), chain.clone()).await.unwrap();

        let reloaded = RuleStore::new(store.pool().clone());
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert_eq!(*reloaded.get(GuildId(3)), chain);
    }

    #[tokio::test]
    async fn corrupt_rule_fails_load() {
        let store = migrated_store().await;
        sqlx::query("INSERT INTO permission_rules (guild_id, position, rule) VALUES (4, 0, 'all-server enable'), (4, 1, 'galaxy-brain enable')")
            .execute(store.pool())
            .await
            .unwrap();

        let rules = RuleStore::new(store.pool().clone());
        let err = rules.load().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptRule { guild: GuildId(4), index: 1, .. }
        ));
    }

    #[tokio::test]
    async fn names_that_cannot_load_back_are_refused() {
        let store = migrated_store().await;
        let rules = RuleStore::new(store.pool().clone());
        let guild = GuildId(1);

        let err = rules
            .append(guild, Rule::command(Scope::Server, "cat fact", false))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidRule(RuleParseError::InvalidName(_))));
        let err = rules
            .append(guild, Rule::module(Scope::Server, "", false))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidRule(_)));
        let err = rules
            .replace_all(
                guild,
                vec![
                    Rule::all(Scope::Server, false),
                    Rule::command(Scope::Server, "two words", true),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidRule(_)));

        assert!(persisted(&store, 1).await.is_empty());
        assert_eq!(*rules.get(guild), vec![Rule::allow_all()]);
        let reloaded = RuleStore::new(store.pool().clone());
        assert_eq!(reloaded.load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn every_accepted_rule_reloads() {
        let store = migrated_store().await;
        let rules = RuleStore::new(store.pool().clone());
        let guild = GuildId(6);
        rules
            .append(guild, Rule::command(Scope::Server, "Cat-Fact", false))
            .await
            .unwrap();
        rules
            .append(guild, Rule::module(Scope::Channel(ChannelId(3)), "fun_stuff", true))
            .await
            .unwrap();

        let reloaded = RuleStore::new(store.pool().clone());
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.get(guild), rules.get(guild));
    }
}
