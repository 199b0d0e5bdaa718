//! Spendable currency: one global ledger keyed by user and one per-guild
//! ledger keyed by (guild, user).
//!
//! Debits are guarded: a spend that would take a balance below zero is
//! refused with [`StateError::InsufficientFunds`] and changes nothing.

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use async_trait::async_trait;
use guildkeep_core::{CurrencyScope, GuildId, UserId};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};

use crate::error::{StateError, StoreResult};
use crate::storage::write_back::{Persister, WriteBackTable};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Key of a currency ledger, with the SQL addressing its row.
///
/// `INSERT` and `UPDATE` bind the amount first, then the key columns.
pub trait CurrencyKey: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    const DOMAIN: &'static str;
    const SELECT_ALL: &'static str;
    const EXISTS: &'static str;
    const INSERT: &'static str;
    const UPDATE: &'static str;

    fn scope(&self) -> CurrencyScope;

    fn bind(self, query: SqliteQuery<'_>) -> SqliteQuery<'_>;

    fn decode(row: &SqliteRow) -> Result<Self, sqlx::Error>;
}

/// Key of the global ledger.
pub type GlobalCurrency = UserId;

/// Key of the per-guild ledger.
pub type GuildCurrency = (GuildId, UserId);

impl CurrencyKey for UserId {
    const DOMAIN: &'static str = "currency_global";
    const SELECT_ALL: &'static str = "SELECT user_id, amount FROM currency_global";
    const EXISTS: &'static str = "SELECT 1 FROM currency_global WHERE user_id = ?";
    const INSERT: &'static str = "INSERT INTO currency_global (amount, user_id) VALUES (?, ?)";
    const UPDATE: &'static str = "UPDATE currency_global SET amount = ? WHERE user_id = ?";

    fn scope(&self) -> CurrencyScope {
        CurrencyScope::Global
    }

    fn bind(self, query: SqliteQuery<'_>) -> SqliteQuery<'_> {
        query.bind(self.to_db())
    }

    fn decode(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self::from_db(row.try_get("user_id")?))
    }
}

impl CurrencyKey for (GuildId, UserId) {
    const DOMAIN: &'static str = "currency_guild";
    const SELECT_ALL: &'static str = "SELECT guild_id, user_id, amount FROM currency_guild";
    const EXISTS: &'static str = "SELECT 1 FROM currency_guild WHERE guild_id = ? AND user_id = ?";
    const INSERT: &'static str =
        "INSERT INTO currency_guild (amount, guild_id, user_id) VALUES (?, ?, ?)";
    const UPDATE: &'static str =
        "UPDATE currency_guild SET amount = ? WHERE guild_id = ? AND user_id = ?";

    fn scope(&self) -> CurrencyScope {
        CurrencyScope::Guild(self.0)
    }

    fn bind(self, query: SqliteQuery<'_>) -> SqliteQuery<'_> {
        query.bind(self.0.to_db()).bind(self.1.to_db())
    }

    fn decode(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok((
            GuildId::from_db(row.try_get("guild_id")?),
            UserId::from_db(row.try_get("user_id")?),
        ))
    }
}

pub struct CurrencyPersister<K>(PhantomData<fn() -> K>);

#[async_trait]
impl<K: CurrencyKey> Persister for CurrencyPersister<K> {
    type Key = K;
    type Value = i64;

    const DOMAIN: &'static str = K::DOMAIN;

    fn default_value(&self, _key: &K) -> i64 {
        0
    }

    async fn load_all(&self, conn: &mut SqliteConnection) -> StoreResult<Vec<(K, i64)>> {
        let rows = sqlx::query(K::SELECT_ALL).fetch_all(&mut *conn).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push((K::decode(row)?, row.try_get("amount")?));
        }
        Ok(out)
    }

    async fn exists(&self, conn: &mut SqliteConnection, key: &K) -> StoreResult<bool> {
        let row = key
            .bind(sqlx::query(K::EXISTS))
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    async fn insert(&self, conn: &mut SqliteConnection, key: &K, value: &i64) -> StoreResult<()> {
        key.bind(sqlx::query(K::INSERT).bind(*value))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn update(&self, conn: &mut SqliteConnection, key: &K, value: &i64) -> StoreResult<()> {
        key.bind(sqlx::query(K::UPDATE).bind(*value))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// One currency ledger.
pub struct CurrencyLedger<K: CurrencyKey> {
    table: WriteBackTable<CurrencyPersister<K>>,
}

impl<K: CurrencyKey> CurrencyLedger<K> {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            table: WriteBackTable::new(CurrencyPersister(PhantomData), pool),
        }
    }

    #[must_use]
    pub fn table(&self) -> &WriteBackTable<CurrencyPersister<K>> {
        &self.table
    }

    pub async fn balance(&self, key: K) -> i64 {
        self.table.get(&key).await
    }

    /// Credits `amount` and returns the new balance.
    ///
    /// # Errors
    ///
    /// [`StateError::Overflow`] if the balance would leave the `i64` range;
    /// the balance is left untouched.
    pub async fn award(&self, key: K, amount: i64) -> Result<i64, StateError> {
        self.table
            .try_mutate(&key, |balance| {
                *balance = balance
                    .checked_add(amount)
                    .ok_or(StateError::Overflow { domain: K::DOMAIN })?;
                Ok(*balance)
            })
            .await
    }

    /// Debits `amount` (negative amounts count as zero) and returns the new
    /// balance.
    ///
    /// # Errors
    ///
    /// [`StateError::InsufficientFunds`] if the balance is below `amount`;
    /// the balance is left untouched.
    pub async fn spend(&self, key: K, amount: i64) -> Result<i64, StateError> {
        let amount = amount.max(0);
        self.table
            .try_mutate(&key, |balance| {
                if *balance < amount {
                    return Err(StateError::InsufficientFunds {
                        scope: key.scope(),
                        held: *balance,
                        needed: amount,
                    });
                }
                *balance -= amount;
                Ok(*balance)
            })
            .await
    }

    /// Moves `amount` from `from` to `to` within this ledger.
    ///
    /// The debit and the credit are separate critical sections; a reader may
    /// observe the debit before the credit.
    ///
    /// # Errors
    ///
    /// [`StateError::InsufficientFunds`] if `from` cannot cover `amount`, or
    /// [`StateError::Overflow`] if `to` cannot hold it; neither balance
    /// changes.
    pub async fn transfer(&self, from: K, to: K, amount: i64) -> Result<(), StateError> {
        let amount = amount.max(0);
        self.spend(from, amount).await?;
        if let Err(err) = self.award(to, amount).await {
            // Refund the debit.
            self.table
                .mutate(&from, |balance| *balance = balance.saturating_add(amount))
                .await;
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::migrated_store;

    #[tokio::test]
    async fn repeated_awards_flush_as_their_sum() {
        let store = migrated_store().await;
        let ledger: CurrencyLedger<GlobalCurrency> = CurrencyLedger::new(store.pool().clone());

        ledger.award(UserId(7), 50).await.unwrap();
        ledger.award(UserId(7), 50).await.unwrap();
        assert_eq!(ledger.balance(UserId(7)).await, 100);

        ledger.table().flush().await.unwrap();
        let amount: i64 = sqlx::query_scalar("SELECT amount FROM currency_global WHERE user_id = 7")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(amount, 100);
    }

    #[tokio::test]
    async fn spend_refuses_overdraft() {
        let store = migrated_store().await;
        let ledger: CurrencyLedger<GuildCurrency> = CurrencyLedger::new(store.pool().clone());
        let key = (GuildId(5), UserId(1));

        ledger.award(key, 3).await.unwrap();
        let err = ledger.spend(key, 10).await.unwrap_err();
        match err {
            StateError::InsufficientFunds { scope, held, needed } => {
                assert_eq!(scope, CurrencyScope::Guild(GuildId(5)));
                assert_eq!(held, 3);
                assert_eq!(needed, 10);
            }
            other => panic!("expected insufficient funds, got {other:?}"),
        }
        assert_eq!(ledger.balance(key).await, 3);
        assert_eq!(ledger.spend(key, 3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transfer_moves_funds_or_nothing() {
        let store = migrated_store().await;
        let ledger: CurrencyLedger<GlobalCurrency> = CurrencyLedger::new(store.pool().clone());

        ledger.award(UserId(1), 20).await.unwrap();
        ledger.transfer(UserId(1), UserId(2), 15).await.unwrap();
        assert_eq!(ledger.balance(UserId(1)).await, 5);
        assert_eq!(ledger.balance(UserId(2)).await, 15);

        assert!(ledger.transfer(UserId(1), UserId(2), 6).await.is_err());
        assert_eq!(ledger.balance(UserId(1)).await, 5);
        assert_eq!(ledger.balance(UserId(2)).await, 15);
    }

    #[tokio::test]
    async fn guild_ledger_keys_are_independent_and_reload() {
        let store = migrated_store().await;
        let ledger: CurrencyLedger<GuildCurrency> = CurrencyLedger::new(store.pool().clone());
        ledger.award((GuildId(1), UserId(9)), 4).await.unwrap();
        ledger.award((GuildId(2), UserId(9)), 8).await.unwrap();
        assert_eq!(ledger.table().flush().await.unwrap().written, 2);

        let reloaded: CurrencyLedger<GuildCurrency> = CurrencyLedger::new(store.pool().clone());
        assert_eq!(reloaded.table().load().await.unwrap(), 2);
        assert_eq!(reloaded.balance((GuildId(1), UserId(9))).await, 4);
        assert_eq!(reloaded.balance((GuildId(2), UserId(9))).await, 8);
    }

    #[tokio::test]
    async fn award_past_i64_max_is_refused() {
        let store = migrated_store().await;
        let ledger: CurrencyLedger<GlobalCurrency> = CurrencyLedger::new(store.pool().clone());

        assert_eq!(ledger.award(UserId(1), i64::MAX).await.unwrap(), i64::MAX);
        let err = ledger.award(UserId(1), 1).await.unwrap_err();
        assert!(matches!(err, StateError::Overflow { domain: "currency_global" }));
        assert_eq!(ledger.balance(UserId(1)).await, i64::MAX);

        ledger.award(UserId(2), i64::MIN).await.unwrap();
        assert!(ledger.award(UserId(2), -1).await.is_err());
        assert_eq!(ledger.balance(UserId(2)).await, i64::MIN);
    }

    #[tokio::test]
    async fn transfer_into_full_balance_is_refunded() {
        let store = migrated_store().await;
        let ledger: CurrencyLedger<GlobalCurrency> = CurrencyLedger::new(store.pool().clone());
        ledger.award(UserId(1), 10).await.unwrap();
        ledger.award(UserId(2), i64::MAX).await.unwrap();

        let err = ledger.transfer(UserId(1), UserId(2), 10).await.unwrap_err();
        assert!(matches!(err, StateError::Overflow { .. }));
        assert_eq!(ledger.balance(UserId(1)).await, 10);
        assert_eq!(ledger.balance(UserId(2)).await, i64::MAX);
    }
}
