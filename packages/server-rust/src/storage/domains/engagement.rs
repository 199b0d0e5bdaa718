//! Engagement points per (guild, user), with a derived per-user global total.

use std::collections::HashMap;

use async_trait::async_trait;
use guildkeep_core::{GuildId, UserId};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{StateError, StoreResult};
use crate::storage::write_back::{DerivedIndex, Persister, WriteBackTable};

type Key = (GuildId, UserId);

pub struct EngagementPersister;

#[async_trait]
impl Persister for EngagementPersister {
    type Key = Key;
    type Value = i64;

    const DOMAIN: &'static str = "engagement";

    fn default_value(&self, _key: &Key) -> i64 {
        0
    }

    async fn load_all(&self, conn: &mut SqliteConnection) -> StoreResult<Vec<(Key, i64)>> {
        let rows = sqlx::query("SELECT guild_id, user_id, points FROM engagement_points")
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| -> StoreResult<(Key, i64)> {
                let guild = GuildId::from_db(row.try_get("guild_id")?);
                let user = UserId::from_db(row.try_get("user_id")?);
                Ok(((guild, user), row.try_get("points")?))
            })
            .collect()
    }

    async fn exists(&self, conn: &mut SqliteConnection, key: &Key) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM engagement_points WHERE guild_id = ? AND user_id = ?")
            .bind(key.0.to_db())
            .bind(key.1.to_db())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, conn: &mut SqliteConnection, key: &Key, value: &i64) -> StoreResult<()> {
        sqlx::query("INSERT INTO engagement_points (guild_id, user_id, points) VALUES (?, ?, ?)")
            .bind(key.0.to_db())
            .bind(key.1.to_db())
            .bind(value)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn update(&self, conn: &mut SqliteConnection, key: &Key, value: &i64) -> StoreResult<()> {
        sqlx::query("UPDATE engagement_points SET points = ? WHERE guild_id = ? AND user_id = ?")
            .bind(value)
            .bind(key.0.to_db())
            .bind(key.1.to_db())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// Sum of a user's points over every guild.
#[derive(Debug, Default)]
pub struct GlobalPoints(HashMap<UserId, i64>);

impl GlobalPoints {
    #[must_use]
    pub fn get(&self, user: UserId) -> i64 {
        self.0.get(&user).copied().unwrap_or(0)
    }
}

impl DerivedIndex<Key, i64> for GlobalPoints {
    // Awards are range-checked before they reach here; saturation only
    // matters for out-of-range rows hydrated from the store.
    fn apply(&mut self, key: &Key, old: Option<&i64>, new: &i64) {
        let delta = new.saturating_sub(old.copied().unwrap_or(0));
        let total = self.0.entry(key.1).or_insert(0);
        *total = total.saturating_add(delta);
    }
}

/// Activity counters. The global total is updated in the same critical
/// section as the per-guild entry, so the two never disagree.
pub struct EngagementLedger {
    table: WriteBackTable<EngagementPersister, GlobalPoints>,
}

impl EngagementLedger {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            table: WriteBackTable::new(EngagementPersister, pool),
        }
    }

    #[must_use]
    pub fn table(&self) -> &WriteBackTable<EngagementPersister, GlobalPoints> {
        &self.table
    }

    /// Adds `amount` points and returns the new per-guild total.
    ///
    /// # Errors
    ///
    /// [`StateError::Overflow`] if either the per-guild or the global total
    /// would leave the `i64` range; neither changes.
    pub async fn award(&self, guild: GuildId, user: UserId, amount: i64) -> Result<i64, StateError> {
        let overflow = || StateError::Overflow {
            domain: EngagementPersister::DOMAIN,
        };
        self.table
            .try_mutate_with_index(&(guild, user), |points, global| {
                let next = points.checked_add(amount).ok_or_else(overflow)?;
                global.get(user).checked_add(amount).ok_or_else(overflow)?;
                *points = next;
                Ok(next)
            })
            .await
    }

    pub async fn points(&self, guild: GuildId, user: UserId) -> i64 {
        self.table.get(&(guild, user)).await
    }

    pub async fn global_points(&self, user: UserId) -> i64 {
        self.table.with_index(|index| index.get(user)).await
    }

    /// Top `limit` users of `guild` by points, highest first. Ties are broken
    /// by user id.
    pub async fn leaderboard(&self, guild: GuildId, limit: usize) -> Vec<(UserId, i64)> {
        let mut ranked: Vec<(UserId, i64)> = self
            .table
            .with_entries(|entries| {
                entries
                    .iter()
                    .filter(|((g, _), _)| *g == guild)
                    .map(|((_, user), points)| (*user, *points))
                    .collect()
            })
            .await;
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::migrated_store;

    #[tokio::test]
    async fn global_total_is_sum_over_guilds() {
        let store = migrated_store().await;
        let ledger = EngagementLedger::new(store.pool().clone());
        let user = UserId(7);

        ledger.award(GuildId(1), user, 10).await.unwrap();
        ledger.award(GuildId(2), user, 5).await.unwrap();
        ledger.award(GuildId(1), user, 3).await.unwrap();

        assert_eq!(ledger.points(GuildId(1), user).await, 13);
        assert_eq!(ledger.points(GuildId(2), user).await, 5);
        assert_eq!(ledger.global_points(user).await, 18);
        assert_eq!(ledger.global_points(UserId(8)).await, 0);
    }

    #[tokio::test]
    async fn global_total_is_rebuilt_on_load() {
        let store = migrated_store().await;
        let ledger = EngagementLedger::new(store.pool().clone());
        ledger.award(GuildId(1), UserId(7), 4).await.unwrap();
        ledger.award(GuildId(2), UserId(7), 6).await.unwrap();
        assert_eq!(ledger.table().flush().await.unwrap().written, 2);

        let reloaded = EngagementLedger::new(store.pool().clone());
        reloaded.table().load().await.unwrap();
        assert_eq!(reloaded.global_points(UserId(7)).await, 10);
    }

    #[tokio::test]
    async fn leaderboard_orders_by_points_then_user() {
        let store = migrated_store().await;
        let ledger = EngagementLedger::new(store.pool().clone());
        ledger.award(GuildId(1), UserId(3), 5).await.unwrap();
        ledger.award(GuildId(1), UserId(1), 9).await.unwrap();
        ledger.award(GuildId(1), UserId(2), 5).await.unwrap();
        ledger.award(GuildId(2), UserId(4), 100).await.unwrap();

        let top = ledger.leaderboard(GuildId(1), 2).await;
        assert_eq!(top, vec![(UserId(1), 9), (UserId(2), 5)]);
    }

    #[tokio::test]
    async fn award_past_i64_max_is_refused() {
        let store = migrated_store().await;
        let ledger = EngagementLedger::new(store.pool().clone());
        let user = UserId(1);

        assert_eq!(ledger.award(GuildId(1), user, i64::MAX).await.unwrap(), i64::MAX);
        let err = ledger.award(GuildId(1), user, 1).await.unwrap_err();
        assert!(matches!(err, StateError::Overflow { domain: "engagement" }));
        assert_eq!(ledger.points(GuildId(1), user).await, i64::MAX);
        assert_eq!(ledger.global_points(user).await, i64::MAX);
    }

    #[tokio::test]
    async fn global_overflow_leaves_both_totals_in_step() {
        let store = migrated_store().await;
        let ledger = EngagementLedger::new(store.pool().clone());
        let user = UserId(2);

        ledger.award(GuildId(1), user, i64::MAX - 1).await.unwrap();
        // Fits in guild 2 on its own but not in the global sum.
        let err = ledger.award(GuildId(2), user, 5).await.unwrap_err();
        assert!(matches!(err, StateError::Overflow { .. }));
        assert_eq!(ledger.points(GuildId(2), user).await, 0);
        assert_eq!(ledger.global_points(user).await, i64::MAX - 1);

        ledger.award(GuildId(2), user, 1).await.unwrap();
        assert_eq!(ledger.global_points(user).await, i64::MAX);
    }

    #[tokio::test]
    async fn negative_awards_stop_at_i64_min() {
        let store = migrated_store().await;
        let ledger = EngagementLedger::new(store.pool().clone());
        ledger.award(GuildId(1), UserId(3), i64::MIN).await.unwrap();
        assert!(ledger.award(GuildId(1), UserId(3), -1).await.is_err());
        assert_eq!(ledger.global_points(UserId(3)).await, i64::MIN);
    }
}
