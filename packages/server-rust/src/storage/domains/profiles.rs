//! Cosmetic user profiles. List columns are stored as JSON text.

use async_trait::async_trait;
use guildkeep_core::{ItemKind, Profile, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::StoreResult;
use crate::storage::write_back::{Persister, WriteBackTable};

pub struct ProfilePersister;

fn decode(row: &SqliteRow) -> StoreResult<(UserId, Profile)> {
    let list = |column: &str| -> StoreResult<Vec<String>> {
        Ok(serde_json::from_str(row.try_get::<&str, _>(column)?)?)
    };
    let profile = Profile {
        title: row.try_get("title")?,
        owned_titles: list("owned_titles")?,
        badges: list("badges")?,
        owned_badges: list("owned_badges")?,
        background: row.try_get("background")?,
    };
    Ok((UserId::from_db(row.try_get("user_id")?), profile))
}

#[async_trait]
impl Persister for ProfilePersister {
    type Key = UserId;
    type Value = Profile;

    const DOMAIN: &'static str = "profiles";

    fn default_value(&self, _key: &UserId) -> Profile {
        Profile::default()
    }

    async fn load_all(&self, conn: &mut SqliteConnection) -> StoreResult<Vec<(UserId, Profile)>> {
        let rows = sqlx::query("SELECT * FROM profiles").fetch_all(&mut *conn).await?;
        rows.iter().map(decode).collect()
    }

    async fn exists(&self, conn: &mut SqliteConnection, key: &UserId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM profiles WHERE user_id = ?")
            .bind(key.to_db())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, conn: &mut SqliteConnection, key: &UserId, value: &Profile) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO profiles (title, owned_titles, badges, owned_badges, background, user_id)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&value.title)
        .bind(serde_json::to_string(&value.owned_titles)?)
        .bind(serde_json::to_string(&value.badges)?)
        .bind(serde_json::to_string(&value.owned_badges)?)
        .bind(&value.background)
        .bind(key.to_db())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn update(&self, conn: &mut SqliteConnection, key: &UserId, value: &Profile) -> StoreResult<()> {
        sqlx::query(
            "UPDATE profiles SET title = ?, owned_titles = ?, badges = ?, owned_badges = ?, background = ?
             WHERE user_id = ?",
        )
        .bind(&value.title)
        .bind(serde_json::to_string(&value.owned_titles)?)
        .bind(serde_json::to_string(&value.badges)?)
        .bind(serde_json::to_string(&value.owned_badges)?)
        .bind(&value.background)
        .bind(key.to_db())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

pub struct ProfileTable {
    table: WriteBackTable<ProfilePersister>,
}

impl ProfileTable {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            table: WriteBackTable::new(ProfilePersister, pool),
        }
    }

    #[must_use]
    pub fn table(&self) -> &WriteBackTable<ProfilePersister> {
        &self.table
    }

    pub async fn profile(&self, user: UserId) -> Profile {
        self.table.get(&user).await
    }

    /// Equips an owned title. Returns `false` (and changes nothing) if the
    /// user does not own it.
    pub async fn set_title(&self, user: UserId, title: &str) -> bool {
        let title = title.to_string();
        self.table
            .try_mutate(&user, move |p| if p.equip_title(&title) { Ok(()) } else { Err(()) })
            .await
            .is_ok()
    }

    /// Records ownership of a title or badge. Returns whether anything changed.
    pub async fn grant(&self, user: UserId, kind: ItemKind, data: &str) -> bool {
        let data = data.to_string();
        self.table
            .try_mutate(&user, move |p| if p.grant(kind, &data) { Ok(()) } else { Err(()) })
            .await
            .is_ok()
    }

    pub async fn set_background(&self, user: UserId, background: Option<String>) {
        self.table.mutate(&user, move |p| p.background = background).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::migrated_store;

    #[tokio::test]
    async fn grants_and_title_survive_reload() {
        let store = migrated_store().await;
        let profiles = ProfileTable::new(store.pool().clone());
        let user = UserId(4);

        assert!(!profiles.set_title(user, "Champion").await);
        assert!(profiles.grant(user, ItemKind::Title, "Champion").await);
        assert!(profiles.grant(user, ItemKind::Badge, "star").await);
        assert!(profiles.set_title(user, "Champion").await);
        profiles.set_background(user, Some("sunset".to_string())).await;
        profiles.table().flush().await.unwrap();

        let reloaded = ProfileTable::new(store.pool().clone());
        reloaded.table().load().await.unwrap();
        let profile = reloaded.profile(user).await;
        assert_eq!(profile.title.as_deref(), Some("Champion"));
        assert_eq!(profile.owned_badges, vec!["star".to_string()]);
        assert_eq!(profile.background.as_deref(), Some("sunset"));
    }

    #[tokio::test]
    async fn duplicate_grant_does_not_dirty() {
        let store = migrated_store().await;
        let profiles = ProfileTable::new(store.pool().clone());
        profiles.grant(UserId(1), ItemKind::Title, "Elder").await;
        profiles.table().flush().await.unwrap();

        assert!(!profiles.grant(UserId(1), ItemKind::Title, "Elder").await);
        assert_eq!(profiles.table().dirty_len().await, 0);
    }
}
