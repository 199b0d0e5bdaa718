//! Users the bot ignores entirely.

use dashmap::DashSet;
use guildkeep_core::UserId;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::StoreResult;

pub struct Blacklist {
    pool: SqlitePool,
    users: DashSet<UserId>,
    write_lock: Mutex<()>,
}

impl Blacklist {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            users: DashSet::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the rows cannot be read.
    pub async fn load(&self) -> StoreResult<usize> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT user_id FROM blacklist")
            .fetch_all(&self.pool)
            .await?;
        let count = ids.len();
        for id in ids {
            self.users.insert(UserId::from_db(id));
        }
        Ok(count)
    }

    #[must_use]
    pub fn contains(&self, user: UserId) -> bool {
        self.users.contains(&user)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Returns `false` if the user was already blacklisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written; memory is unchanged.
    pub async fn add(&self, user: UserId) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        if self.users.contains(&user) {
            return Ok(false);
        }
        sqlx::query("INSERT OR IGNORE INTO blacklist (user_id) VALUES (?)")
            .bind(user.to_db())
            .execute(&self.pool)
            .await?;
        self.users.insert(user);
        info!(%user, "Blacklisted user");
        Ok(true)
    }

    /// Returns `false` if the user was not blacklisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be deleted; memory is unchanged.
    pub async fn remove(&self, user: UserId) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        if !self.users.contains(&user) {
            return Ok(false);
        }
        sqlx::query("DELETE FROM blacklist WHERE user_id = ?")
            .bind(user.to_db())
            .execute(&self.pool)
            .await?;
        self.users.remove(&user);
        info!(%user, "Removed user from blacklist");
        Ok(true)
    }
}
