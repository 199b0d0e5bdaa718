//! Per-guild shop inventory. Persisted by replacing the guild's whole list.

use std::collections::HashMap;

use async_trait::async_trait;
use guildkeep_core::{GuildId, ItemKind, ShopItem};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{StateError, StoreError, StoreResult};
use crate::storage::write_back::{Persister, WriteBackTable};

const DOMAIN: &str = "shop";

pub struct ShopPersister;

impl ShopPersister {
    async fn delete_rows(conn: &mut SqliteConnection, guild: GuildId) -> StoreResult<()> {
        sqlx::query("DELETE FROM shop_items WHERE guild_id = ?")
            .bind(guild.to_db())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn insert_rows(
        conn: &mut SqliteConnection,
        guild: GuildId,
        items: &[ShopItem],
    ) -> StoreResult<()> {
        for (position, item) in (0_i64..).zip(items) {
            sqlx::query(
                "INSERT INTO shop_items (guild_id, position, kind, data, cost) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(guild.to_db())
            .bind(position)
            .bind(item.kind.as_str())
            .bind(&item.data)
            .bind(item.cost)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Persister for ShopPersister {
    type Key = GuildId;
    type Value = Vec<ShopItem>;

    const DOMAIN: &'static str = DOMAIN;

    fn default_value(&self, _key: &GuildId) -> Vec<ShopItem> {
        Vec::new()
    }

    async fn load_all(
        &self,
        conn: &mut SqliteConnection,
    ) -> StoreResult<Vec<(GuildId, Vec<ShopItem>)>> {
        let rows = sqlx::query(
            "SELECT guild_id, kind, data, cost FROM shop_items ORDER BY guild_id, position",
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut by_guild: HashMap<GuildId, Vec<ShopItem>> = HashMap::new();
        for row in &rows {
            let guild = GuildId::from_db(row.try_get("guild_id")?);
            let kind: ItemKind = row
                .try_get::<&str, _>("kind")?
                .parse()
                .map_err(|err: guildkeep_core::types::UnknownItemKind| StoreError::Corrupt {
                    domain: DOMAIN,
                    detail: err.to_string(),
                })?;
            let item = ShopItem::new(kind, row.try_get::<String, _>("data")?, row.try_get("cost")?);
            by_guild.entry(guild).or_default().push(item);
        }
        Ok(by_guild.into_iter().collect())
    }

    async fn exists(&self, conn: &mut SqliteConnection, key: &GuildId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM shop_items WHERE guild_id = ? LIMIT 1")
            .bind(key.to_db())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        key: &GuildId,
        value: &Vec<ShopItem>,
    ) -> StoreResult<()> {
        Self::insert_rows(conn, *key, value).await
    }

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        key: &GuildId,
        value: &Vec<ShopItem>,
    ) -> StoreResult<()> {
        Self::delete_rows(&mut *conn, *key).await?;
        Self::insert_rows(conn, *key, value).await
    }

    /// No probe: the list is always rewritten from scratch.
    async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        key: &GuildId,
        value: &Vec<ShopItem>,
    ) -> StoreResult<()> {
        self.update(conn, key, value).await
    }
}

pub struct ShopInventory {
    table: WriteBackTable<ShopPersister>,
}

impl ShopInventory {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            table: WriteBackTable::new(ShopPersister, pool),
        }
    }

    #[must_use]
    pub fn table(&self) -> &WriteBackTable<ShopPersister> {
        &self.table
    }

    pub async fn items(&self, guild: GuildId) -> Vec<ShopItem> {
        self.table.get(&guild).await
    }

    pub async fn item(&self, guild: GuildId, index: usize) -> Option<ShopItem> {
        self.items(guild).await.into_iter().nth(index)
    }

    /// Appends `item` and returns its index.
    pub async fn add_item(&self, guild: GuildId, item: ShopItem) -> usize {
        self.table
            .mutate(&guild, |items| {
                items.push(item);
                items.len() - 1
            })
            .await
    }

    /// Removes and returns the item at `index`. Later items shift down.
    ///
    /// # Errors
    ///
    /// [`StateError::IndexOutOfRange`] if there is no item at `index`.
    pub async fn remove_item(&self, guild: GuildId, index: usize) -> Result<ShopItem, StateError> {
        self.table
            .try_mutate(&guild, |items| {
                if index >= items.len() {
                    return Err(StateError::IndexOutOfRange {
                        index,
                        len: items.len(),
                    });
                }
                Ok(items.remove(index))
            })
            .await
    }
}
