//! Backing store adapter: one SQLite connection shared by every domain.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use super::migrations::{self, Migration, MIGRATIONS};
use crate::error::StoreResult;

/// Handle to the relational backing store.
///
/// The pool is pinned to a single connection, so storage-level writes are
/// always serialized regardless of how many domains flush at once. Cloning
/// is cheap and shares the connection.
#[derive(Debug, Clone)]
pub struct BackingStore {
    pool: SqlitePool,
}

impl BackingStore {
    /// Opens (creating if missing) the database at `url`, e.g.
    /// `sqlite://guildkeep.db`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or the file cannot be opened.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = single_connection()
            .connect_with(options)
            .await?;
        info!(url, "Opened backing store");
        Ok(Self { pool })
    }

    /// Opens a private in-memory database. The single pinned connection keeps
    /// it alive for the lifetime of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = single_connection().connect_with(options).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the base schema and applies the built-in migrations.
    ///
    /// Returns the number of migrations applied.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError::Migration`] if a migration fails.
    /// Callers must treat that as fatal.
    pub async fn load(&self) -> StoreResult<usize> {
        self.load_with(MIGRATIONS).await
    }

    /// Like [`load`](Self::load) with a caller-supplied migration list.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StoreError::Migration`] if a migration fails.
    pub async fn load_with(&self, migrations: &[Migration]) -> StoreResult<usize> {
        migrations::create_base_schema(&self.pool).await?;
        migrations::apply(&self.pool, migrations).await
    }

    /// Current schema version (`PRAGMA user_version`).
    ///
    /// # Errors
    ///
    /// Returns an error if the pragma cannot be read.
    pub async fn schema_version(&self) -> StoreResult<u32> {
        migrations::schema_version(&self.pool).await
    }
}

fn single_connection() -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[tokio::test]
    async fn fresh_store_migrates_to_latest_once() {
        let store = BackingStore::in_memory().await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), 0);

        let applied = store.load().await.unwrap();
        assert_eq!(applied, 4);
        assert_eq!(store.schema_version().await.unwrap(), 4);

        let again = store.load().await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(store.schema_version().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn migrated_columns_exist() {
        let store = BackingStore::in_memory().await.unwrap();
        store.load().await.unwrap();

        sqlx::query("INSERT INTO guild_settings (guild_id, delete_on_ban, reply_as_embed) VALUES (1, 1, 0)")
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO profiles (user_id) VALUES (9)")
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO greetings (guild_id, kind, text, delete_after_secs) VALUES (1, 'welcome', 'hi', 30)")
            .execute(store.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_migration_stops_at_last_good_version() {
        const LIST: &[Migration] = &[
            Migration {
                version: 1,
                name: "ok",
                sql: "CREATE TABLE extra (id INTEGER PRIMARY KEY)",
            },
            Migration {
                version: 2,
                name: "broken",
                sql: "ALTER TABLE no_such_table ADD COLUMN x INTEGER",
            },
            Migration {
                version: 3,
                name: "never",
                sql: "CREATE TABLE never (id INTEGER)",
            },
        ];

        let store = BackingStore::in_memory().await.unwrap();
        let err = store.load_with(LIST).await.unwrap_err();
        match err {
            StoreError::Migration { version, name, .. } => {
                assert_eq!(version, 2);
                assert_eq!(name, "broken");
            }
            other => panic!("expected migration error, got {other:?}"),
        }
        assert_eq!(store.schema_version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn migrations_apply_in_version_order_regardless_of_list_order() {
        const LIST: &[Migration] = &[
            Migration {
                version: 2,
                name: "second",
                sql: "ALTER TABLE extra ADD COLUMN note TEXT",
            },
            Migration {
                version: 1,
                name: "first",
                sql: "CREATE TABLE extra (id INTEGER PRIMARY KEY)",
            },
        ];

        let store = BackingStore::in_memory().await.unwrap();
        assert_eq!(store.load_with(LIST).await.unwrap(), 2);
        assert_eq!(store.schema_version().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn file_store_keeps_version_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("state.db").display());

        let first = BackingStore::connect(&url).await.unwrap();
        assert_eq!(first.load().await.unwrap(), 4);
        first.pool().close().await;

        let second = BackingStore::connect(&url).await.unwrap();
        assert_eq!(second.load().await.unwrap(), 0);
        assert_eq!(second.schema_version().await.unwrap(), 4);
    }
}
