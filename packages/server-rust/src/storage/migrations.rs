//! Base schema and versioned migrations.
//!
//! The base schema is created with `CREATE TABLE IF NOT EXISTS` on every
//! start. Migrations then move it forward: the schema version lives in
//! SQLite's `PRAGMA user_version`, and every migration whose version is
//! greater than the stored one is applied in ascending order, each in its own
//! transaction together with the version bump. Migrations never run twice and
//! are never rolled back.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// One forward-only schema change.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Schema version after this migration is applied.
    pub version: u32,
    pub name: &'static str,
    /// One or more SQL statements.
    pub sql: &'static str,
}

/// Version-0 shape of every table. Later columns arrive through [`MIGRATIONS`].
const BASE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS guild_settings (
    guild_id INTEGER PRIMARY KEY,
    color_success INTEGER NOT NULL DEFAULT 43520,
    color_error INTEGER NOT NULL DEFAULT 11141120,
    color_info INTEGER NOT NULL DEFAULT 170,
    prefix TEXT NOT NULL DEFAULT '!',
    show_permission_errors INTEGER NOT NULL DEFAULT 1,
    currency_chance INTEGER NOT NULL DEFAULT 5,
    currency_min INTEGER NOT NULL DEFAULT 1,
    currency_max INTEGER NOT NULL DEFAULT 10,
    currency_channels TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS engagement_points (
    guild_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    points INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (guild_id, user_id)
);

CREATE TABLE IF NOT EXISTS currency_global (
    user_id INTEGER PRIMARY KEY,
    amount INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS currency_guild (
    guild_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    amount INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (guild_id, user_id)
);

CREATE TABLE IF NOT EXISTS shop_items (
    guild_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    kind TEXT NOT NULL,
    data TEXT NOT NULL,
    cost INTEGER NOT NULL,
    PRIMARY KEY (guild_id, position)
);

CREATE TABLE IF NOT EXISTS greetings (
    guild_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    text TEXT NOT NULL,
    channel_id INTEGER,
    PRIMARY KEY (guild_id, kind)
);

CREATE TABLE IF NOT EXISTS auto_roles (
    guild_id INTEGER NOT NULL,
    role_id INTEGER NOT NULL,
    PRIMARY KEY (guild_id, role_id)
);

CREATE TABLE IF NOT EXISTS permission_rules (
    guild_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    rule TEXT NOT NULL,
    PRIMARY KEY (guild_id, position)
);

CREATE TABLE IF NOT EXISTS blacklist (
    user_id INTEGER PRIMARY KEY
);
";

/// Built-in migrations, in version order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "guild_delete_on_ban",
        sql: "ALTER TABLE guild_settings ADD COLUMN delete_on_ban INTEGER NOT NULL DEFAULT 0",
    },
    Migration {
        version: 2,
        name: "guild_reply_as_embed",
        sql: "ALTER TABLE guild_settings ADD COLUMN reply_as_embed INTEGER NOT NULL DEFAULT 0",
    },
    Migration {
        version: 3,
        name: "profiles",
        sql: "
            CREATE TABLE profiles (
                user_id INTEGER PRIMARY KEY,
                title TEXT,
                owned_titles TEXT NOT NULL DEFAULT '[]',
                badges TEXT NOT NULL DEFAULT '[]',
                owned_badges TEXT NOT NULL DEFAULT '[]',
                background TEXT
            )
        ",
    },
    Migration {
        version: 4,
        name: "greeting_delete_after",
        sql: "ALTER TABLE greetings ADD COLUMN delete_after_secs INTEGER",
    },
];

/// Creates every base table that does not exist yet.
pub(crate) async fn create_base_schema(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::raw_sql(BASE_SCHEMA).execute(pool).await?;
    Ok(())
}

/// Reads the stored schema version.
pub(crate) async fn schema_version(pool: &SqlitePool) -> StoreResult<u32> {
    let raw: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(u32::try_from(raw).unwrap_or(0))
}

/// Applies every migration newer than the stored version.
///
/// Returns how many were applied. Stops at the first failure; the version
/// then stays at the last migration that committed.
pub(crate) async fn apply(pool: &SqlitePool, migrations: &[Migration]) -> StoreResult<usize> {
    let current = schema_version(pool).await?;

    let mut pending: Vec<&Migration> = migrations.iter().filter(|m| m.version > current).collect();
    pending.sort_by_key(|m| m.version);

    let Some(target) = pending.last().map(|m| m.version) else {
        debug!(current_version = current, "Schema up to date");
        return Ok(0);
    };
    info!(current_version = current, target_version = target, "Running migrations");

    for migration in &pending {
        let failed = |source| StoreError::Migration {
            version: migration.version,
            name: migration.name,
            source,
        };

        let mut tx = pool.begin().await.map_err(failed)?;
        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(failed)?;
        let bump = format!("PRAGMA user_version = {}", migration.version);
        sqlx::raw_sql(&bump).execute(&mut *tx).await.map_err(failed)?;
        tx.commit().await.map_err(failed)?;

        info!(version = migration.version, name = migration.name, "Applied migration");
    }

    Ok(pending.len())
}
