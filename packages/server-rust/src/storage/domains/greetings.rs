//! Welcome and goodbye messages per guild. One row per message kind,
//! rewritten together on flush.

use std::collections::HashMap;

use async_trait::async_trait;
use guildkeep_core::{ChannelId, Greeting, Greetings, GuildId};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{StoreError, StoreResult};
use crate::storage::write_back::{Persister, WriteBackTable};

const DOMAIN: &str = "greetings";
const WELCOME: &str = "welcome";
const GOODBYE: &str = "goodbye";

pub struct GreetingsPersister;

impl GreetingsPersister {
    async fn write_rows(
        conn: &mut SqliteConnection,
        guild: GuildId,
        greetings: &Greetings,
    ) -> StoreResult<()> {
        for (kind, greeting) in [(WELCOME, &greetings.welcome), (GOODBYE, &greetings.goodbye)] {
            sqlx::query(
                "INSERT INTO greetings (guild_id, kind, text, channel_id, delete_after_secs)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(guild.to_db())
            .bind(kind)
            .bind(&greeting.text)
            .bind(greeting.channel_id.map(ChannelId::to_db))
            .bind(greeting.delete_after_secs.map(i64::from))
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Persister for GreetingsPersister {
    type Key = GuildId;
    type Value = Greetings;

    const DOMAIN: &'static str = DOMAIN;

    fn default_value(&self, _key: &GuildId) -> Greetings {
        Greetings::default()
    }

    async fn load_all(&self, conn: &mut SqliteConnection) -> StoreResult<Vec<(GuildId, Greetings)>> {
        let rows = sqlx::query(
            "SELECT guild_id, kind, text, channel_id, delete_after_secs FROM greetings",
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut by_guild: HashMap<GuildId, Greetings> = HashMap::new();
        for row in &rows {
            let guild = GuildId::from_db(row.try_get("guild_id")?);
            let delete_after = row
                .try_get::<Option<i64>, _>("delete_after_secs")?
                .map(|secs| super::narrow(DOMAIN, "delete_after_secs", secs))
                .transpose()?;
            let greeting = Greeting {
                text: row.try_get("text")?,
                channel_id: row.try_get::<Option<i64>, _>("channel_id")?.map(ChannelId::from_db),
                delete_after_secs: delete_after,
            };

            let entry = by_guild.entry(guild).or_default();
            match row.try_get::<&str, _>("kind")? {
                WELCOME => entry.welcome = greeting,
                GOODBYE => entry.goodbye = greeting,
                other => {
                    return Err(StoreError::Corrupt {
                        domain: DOMAIN,
                        detail: format!("unknown greeting kind {other:?}"),
                    })
                }
            }
        }
        Ok(by_guild.into_iter().collect())
    }

    async fn exists(&self, conn: &mut SqliteConnection, key: &GuildId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM greetings WHERE guild_id = ? LIMIT 1")
            .bind(key.to_db())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        key: &GuildId,
        value: &Greetings,
    ) -> StoreResult<()> {
        Self::write_rows(conn, *key, value).await
    }

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        key: &GuildId,
        value: &Greetings,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM greetings WHERE guild_id = ?")
            .bind(key.to_db())
            .execute(&mut *conn)
            .await?;
        Self::write_rows(conn, *key, value).await
    }

    async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        key: &GuildId,
        value: &Greetings,
    ) -> StoreResult<()> {
        self.update(conn, key, value).await
    }
}

pub struct GreetingsTable {
    table: WriteBackTable<GreetingsPersister>,
}

impl GreetingsTable {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            table: WriteBackTable::new(GreetingsPersister, pool),
        }
    }

    #[must_use]
    pub fn table(&self) -> &WriteBackTable<GreetingsPersister> {
        &self.table
    }

    pub async fn greetings(&self, guild: GuildId) -> Greetings {
        self.table.get(&guild).await
    }

    pub async fn set_welcome(&self, guild: GuildId, welcome: Greeting) {
        self.table.mutate(&guild, move |g| g.welcome = welcome).await;
    }

    pub async fn set_goodbye(&self, guild: GuildId, goodbye: Greeting) {
        self.table.mutate(&guild, move |g| g.goodbye = goodbye).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::migrated_store;

    #[tokio::test]
    async fn defaults_use_placeholder_templates() {
        let store = migrated_store().await;
        let table = GreetingsTable::new(store.pool().clone());
        let greetings = table.greetings(GuildId(1)).await;
        assert_eq!(greetings, Greetings::default());
        assert!(greetings.welcome.text.contains("{user}"));
    }

    #[tokio::test]
    async fn configured_greetings_survive_reload() {
        let store = migrated_store().await;
        let table = GreetingsTable::new(store.pool().clone());
        let welcome = Greeting {
            text: "Hi {user}".to_string(),
            channel_id: Some(ChannelId(55)),
            delete_after_secs: Some(30),
        };
        table.set_welcome(GuildId(1), welcome.clone()).await;
        table.table().flush().await.unwrap();

        // A second flush cycle after another edit must not duplicate rows.
        table
            .set_goodbye(
                GuildId(1),
                Greeting {
                    text: "Bye {user}".to_string(),
                    channel_id: None,
                    delete_after_secs: None,
                },
            )
            .await;
        table.table().flush().await.unwrap();

        let reloaded = GreetingsTable::new(store.pool().clone());
        reloaded.table().load().await.unwrap();
        let greetings = reloaded.greetings(GuildId(1)).await;
        assert_eq!(greetings.welcome, welcome);
        assert_eq!(greetings.goodbye.text, "Bye {user}");

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM greetings")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(rows, 2);
    }
}
