//! Per-guild settings.
//!
//! The row is created as soon as a guild is first seen (base row), so later
//! flushes normally update columns. A row missing at flush time is written
//! whole by a single insert.

use async_trait::async_trait;
use guildkeep_core::{ChannelId, CurrencyDrop, EmbedColors, GuildId, GuildSettings};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::narrow;
use crate::error::StoreResult;
use crate::storage::write_back::{Persister, WriteBackTable};

const DOMAIN: &str = "guild_settings";

pub struct GuildSettingsPersister;

fn decode(row: &SqliteRow) -> StoreResult<(GuildId, GuildSettings)> {
    let guild = GuildId::from_db(row.try_get("guild_id")?);
    let channels: Vec<ChannelId> =
        serde_json::from_str(row.try_get::<&str, _>("currency_channels")?)?;
    let settings = GuildSettings {
        colors: EmbedColors {
            success: narrow(DOMAIN, "color_success", row.try_get("color_success")?)?,
            error: narrow(DOMAIN, "color_error", row.try_get("color_error")?)?,
            info: narrow(DOMAIN, "color_info", row.try_get("color_info")?)?,
        },
        prefix: row.try_get("prefix")?,
        show_permission_errors: row.try_get("show_permission_errors")?,
        currency_drop: CurrencyDrop {
            chance_percent: narrow(DOMAIN, "currency_chance", row.try_get("currency_chance")?)?,
            min_amount: row.try_get("currency_min")?,
            max_amount: row.try_get("currency_max")?,
            channels,
        },
        delete_on_ban: row.try_get("delete_on_ban")?,
        reply_as_embed: row.try_get("reply_as_embed")?,
    };
    Ok((guild, settings))
}

#[async_trait]
impl Persister for GuildSettingsPersister {
    type Key = GuildId;
    type Value = GuildSettings;

    const DOMAIN: &'static str = DOMAIN;
    const BASE_ROW: bool = true;

    fn default_value(&self, _key: &GuildId) -> GuildSettings {
        GuildSettings::default()
    }

    async fn load_all(
        &self,
        conn: &mut SqliteConnection,
    ) -> StoreResult<Vec<(GuildId, GuildSettings)>> {
        let rows = sqlx::query("SELECT * FROM guild_settings")
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn insert_base_row(&self, conn: &mut SqliteConnection, key: &GuildId) -> StoreResult<()> {
        sqlx::query("INSERT INTO guild_settings (guild_id) VALUES (?)")
            .bind(key.to_db())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn exists(&self, conn: &mut SqliteConnection, key: &GuildId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM guild_settings WHERE guild_id = ?")
            .bind(key.to_db())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        key: &GuildId,
        value: &GuildSettings,
    ) -> StoreResult<()> {
        write_columns(
            conn,
            "INSERT INTO guild_settings (
                color_success, color_error, color_info,
                prefix, show_permission_errors,
                currency_chance, currency_min, currency_max, currency_channels,
                delete_on_ban, reply_as_embed, guild_id
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            key,
            value,
        )
        .await
    }

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        key: &GuildId,
        value: &GuildSettings,
    ) -> StoreResult<()> {
        write_columns(
            conn,
            "UPDATE guild_settings SET
                color_success = ?, color_error = ?, color_info = ?,
                prefix = ?, show_permission_errors = ?,
                currency_chance = ?, currency_min = ?, currency_max = ?, currency_channels = ?,
                delete_on_ban = ?, reply_as_embed = ?
             WHERE guild_id = ?",
            key,
            value,
        )
        .await
    }
}

/// Runs `sql` with every settings column bound in table order, then the
/// guild id.
async fn write_columns(
    conn: &mut SqliteConnection,
    sql: &str,
    key: &GuildId,
    value: &GuildSettings,
) -> StoreResult<()> {
    let channels = serde_json::to_string(&value.currency_drop.channels)?;
    sqlx::query(sql)
        .bind(i64::from(value.colors.success))
        .bind(i64::from(value.colors.error))
        .bind(i64::from(value.colors.info))
        .bind(&value.prefix)
        .bind(value.show_permission_errors)
        .bind(i64::from(value.currency_drop.chance_percent))
        .bind(value.currency_drop.min_amount)
        .bind(value.currency_drop.max_amount)
        .bind(channels)
        .bind(value.delete_on_ban)
        .bind(value.reply_as_embed)
        .bind(key.to_db())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Settings of every guild the bot has seen.
pub struct GuildSettingsTable {
    table: WriteBackTable<GuildSettingsPersister>,
}

impl GuildSettingsTable {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            table: WriteBackTable::new(GuildSettingsPersister, pool),
        }
    }

    #[must_use]
    pub fn table(&self) -> &WriteBackTable<GuildSettingsPersister> {
        &self.table
    }

    /// Settings of `guild`, created with defaults on first access.
    pub async fn settings(&self, guild: GuildId) -> GuildSettings {
        self.table.get(&guild).await
    }

    /// Applies `f` to the settings of `guild`.
    pub async fn update<R>(&self, guild: GuildId, f: impl FnOnce(&mut GuildSettings) -> R + Send) -> R {
        self.table.mutate(&guild, f).await
    }

    pub async fn set_prefix(&self, guild: GuildId, prefix: impl Into<String>) {
        let prefix = prefix.into();
        self.update(guild, move |s| s.prefix = prefix).await;
    }

    pub async fn set_colors(&self, guild: GuildId, colors: EmbedColors) {
        self.update(guild, move |s| s.colors = colors).await;
    }

    pub async fn set_show_permission_errors(&self, guild: GuildId, show: bool) {
        self.update(guild, move |s| s.show_permission_errors = show).await;
    }

    pub async fn set_currency_drop(&self, guild: GuildId, drop: CurrencyDrop) {
        self.update(guild, move |s| s.currency_drop = drop).await;
    }
}
