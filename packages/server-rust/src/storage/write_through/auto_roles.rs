//! Roles granted to members when they join a guild.

use std::collections::BTreeSet;

use dashmap::DashMap;
use guildkeep_core::{GuildId, RoleId};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::error::StoreResult;

pub struct AutoRoleStore {
    pool: SqlitePool,
    roles: DashMap<GuildId, BTreeSet<RoleId>>,
    write_lock: Mutex<()>,
}

impl AutoRoleStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            roles: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the rows cannot be read.
    pub async fn load(&self) -> StoreResult<usize> {
        let rows: Vec<(i64, i64)> = sqlx::query_as("SELECT guild_id, role_id FROM auto_roles")
            .fetch_all(&self.pool)
            .await?;
        let count = rows.len();
        for (guild, role) in rows {
            self.roles
                .entry(GuildId::from_db(guild))
                .or_default()
                .insert(RoleId::from_db(role));
        }
        Ok(count)
    }

    /// Auto-roles of `guild` in ascending id order.
    #[must_use]
    pub fn roles(&self, guild: GuildId) -> Vec<RoleId> {
        self.roles
            .get(&guild)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Adds `role`. Returns `false` if it was already configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written; memory is unchanged.
    pub async fn add(&self, guild: GuildId, role: RoleId) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        if self.roles.get(&guild).is_some_and(|set| set.contains(&role)) {
            return Ok(false);
        }
        sqlx::query("INSERT OR IGNORE INTO auto_roles (guild_id, role_id) VALUES (?, ?)")
            .bind(guild.to_db())
            .bind(role.to_db())
            .execute(&self.pool)
            .await?;
        self.roles.entry(guild).or_default().insert(role);
        Ok(true)
    }

    /// Removes `role`. Returns `false` if it was not configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be deleted; memory is unchanged.
    pub async fn remove(&self, guild: GuildId, role: RoleId) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        if !self.roles.get(&guild).is_some_and(|set| set.contains(&role)) {
            return Ok(false);
        }
        sqlx::query("DELETE FROM auto_roles WHERE guild_id = ? AND role_id = ?")
            .bind(guild.to_db())
            .bind(role.to_db())
            .execute(&self.pool)
            .await?;
        if let Some(mut set) = self.roles.get_mut(&guild) {
            set.remove(&role);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::migrated_store;

    #[tokio::test]
    async fn add_and_remove_write_through() {
        let store = migrated_store().await;
        let roles = AutoRoleStore::new(store.pool().clone());

        assert!(roles.add(GuildId(1), RoleId(30)).await.unwrap());
        assert!(roles.add(GuildId(1), RoleId(10)).await.unwrap());
        assert!(!roles.add(GuildId(1), RoleId(10)).await.unwrap());
        assert!(roles.remove(GuildId(1), RoleId(30)).await.unwrap());
        assert!(!roles.remove(GuildId(1), RoleId(30)).await.unwrap());

        let reloaded = AutoRoleStore::new(store.pool().clone());
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert_eq!(reloaded.roles(GuildId(1)), vec![RoleId(10)]);
        assert!(reloaded.roles(GuildId(2)).is_empty());
    }
}
