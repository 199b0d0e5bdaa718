//! Generic write-back table.
//!
//! A [`WriteBackTable`] holds one state domain in memory: a map of entries, the
//! set of keys mutated since the last successful flush, and an optional derived
//! index. All three live behind a single async mutex, so a mutation, the index
//! update that goes with it, and the flush that persists it never interleave.
//!
//! Mutators never perform I/O. [`WriteBackTable::flush`] snapshots the dirty
//! set and writes every dirty key in one transaction; the dirty set is cleared
//! only after the commit succeeds, so a failed flush is retried in full on the
//! next cycle.
//!
//! Lock order is always: domain lock, then the backing-store connection. No
//! code path holds two domain locks.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::{StoreError, StoreResult};

/// Per-domain persistence strategy.
///
/// `exists` / `insert` / `update` each issue the statements for one key. The
/// provided [`upsert`](Persister::upsert) probes then issues exactly one of
/// the two writes; whole-list domains override it to replace the key's rows.
#[async_trait]
pub trait Persister: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    /// Domain name used in logs, metrics and errors.
    const DOMAIN: &'static str;

    /// Whether `ensure` inserts a base row immediately for a new key.
    const BASE_ROW: bool = false;

    /// The documented default for a key seen for the first time.
    fn default_value(&self, key: &Self::Key) -> Self::Value;

    /// Reads every persisted entry of the domain.
    async fn load_all(
        &self,
        conn: &mut SqliteConnection,
    ) -> StoreResult<Vec<(Self::Key, Self::Value)>>;

    /// Inserts the row later flushes update. Only called when
    /// [`BASE_ROW`](Persister::BASE_ROW) is set. Must fail with a unique
    /// violation if the row already exists.
    async fn insert_base_row(
        &self,
        _conn: &mut SqliteConnection,
        _key: &Self::Key,
    ) -> StoreResult<()> {
        Ok(())
    }

    async fn exists(&self, conn: &mut SqliteConnection, key: &Self::Key) -> StoreResult<bool>;

    async fn insert(
        &self,
        conn: &mut SqliteConnection,
        key: &Self::Key,
        value: &Self::Value,
    ) -> StoreResult<()>;

    async fn update(
        &self,
        conn: &mut SqliteConnection,
        key: &Self::Key,
        value: &Self::Value,
    ) -> StoreResult<()>;

    async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        key: &Self::Key,
        value: &Self::Value,
    ) -> StoreResult<()> {
        if self.exists(&mut *conn, key).await? {
            self.update(conn, key, value).await
        } else {
            self.insert(conn, key, value).await
        }
    }
}

/// Secondary view maintained in the same critical section as the entries.
pub trait DerivedIndex<K, V>: Default + Send + 'static {
    /// When `false`, mutators skip cloning the previous value.
    const ENABLED: bool = true;

    /// Called after `key` changed from `old` (absent for new keys) to `new`.
    fn apply(&mut self, key: &K, old: Option<&V>, new: &V);
}

/// No derived index.
#[derive(Debug, Default)]
pub struct NoIndex;

impl<K, V> DerivedIndex<K, V> for NoIndex {
    const ENABLED: bool = false;

    fn apply(&mut self, _key: &K, _old: Option<&V>, _new: &V) {}
}

/// Outcome of one successful domain flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub domain: &'static str,
    /// Rows written. Zero when nothing was dirty.
    pub written: usize,
}

struct TableState<K, V, X> {
    entries: HashMap<K, V>,
    dirty: HashSet<K>,
    index: X,
}

/// In-memory domain with dirty tracking and batched persistence.
pub struct WriteBackTable<P: Persister, X = NoIndex> {
    persister: P,
    pool: SqlitePool,
    state: Mutex<TableState<P::Key, P::Value, X>>,
}

impl<P, X> WriteBackTable<P, X>
where
    P: Persister,
    X: DerivedIndex<P::Key, P::Value>,
{
    pub fn new(persister: P, pool: SqlitePool) -> Self {
        Self {
            persister,
            pool,
            state: Mutex::new(TableState {
                entries: HashMap::new(),
                dirty: HashSet::new(),
                index: X::default(),
            }),
        }
    }

    #[must_use]
    pub fn domain(&self) -> &'static str {
        P::DOMAIN
    }

    /// Hydrates the table from the backing store. Loaded entries are clean.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows cannot be read or decoded.
    pub async fn load(&self) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let mut conn = self.pool.acquire().await?;
        let rows = self.persister.load_all(&mut conn).await?;
        let count = rows.len();
        for (key, value) in rows {
            state.index.apply(&key, None, &value);
            state.entries.insert(key, value);
        }
        debug!(domain = P::DOMAIN, rows = count, "Hydrated domain");
        Ok(count)
    }

    /// Makes sure `key` has a value, inserting the default if absent.
    pub async fn ensure(&self, key: &P::Key) {
        let mut state = self.state.lock().await;
        self.ensure_locked(&mut state, key).await;
    }

    /// Current value of `key`, created with the default if absent.
    pub async fn get(&self, key: &P::Key) -> P::Value {
        let mut state = self.state.lock().await;
        self.ensure_locked(&mut state, key).await;
        match state.entries.get(key) {
            Some(value) => value.clone(),
            None => self.persister.default_value(key),
        }
    }

    /// Whether `key` is present without creating it.
    pub async fn contains(&self, key: &P::Key) -> bool {
        self.state.lock().await.entries.contains_key(key)
    }

    /// Applies `f` to the value of `key` and marks the key dirty.
    pub async fn mutate<R>(&self, key: &P::Key, f: impl FnOnce(&mut P::Value) -> R + Send) -> R {
        let mut state = self.state.lock().await;
        self.ensure_locked(&mut state, key).await;

        let TableState {
            entries,
            dirty,
            index,
        } = &mut *state;
        let value = entries
            .entry(key.clone())
            .or_insert_with(|| self.persister.default_value(key));
        let before = X::ENABLED.then(|| value.clone());
        let out = f(value);
        index.apply(key, before.as_ref(), value);
        dirty.insert(key.clone());
        out
    }

    /// Like [`mutate`](Self::mutate), but `f` works on a copy that is kept
    /// only when it returns `Ok`. On `Err` nothing changes and the key is
    /// not marked dirty.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub async fn try_mutate<R, E>(
        &self,
        key: &P::Key,
        f: impl FnOnce(&mut P::Value) -> Result<R, E> + Send,
    ) -> Result<R, E> {
        self.try_mutate_with_index(key, |value, _| f(value)).await
    }

    /// [`try_mutate`](Self::try_mutate) with read access to the derived
    /// index as it is before the change, inside the same critical section.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub async fn try_mutate_with_index<R, E>(
        &self,
        key: &P::Key,
        f: impl FnOnce(&mut P::Value, &X) -> Result<R, E> + Send,
    ) -> Result<R, E> {
        let mut state = self.state.lock().await;
        self.ensure_locked(&mut state, key).await;

        let TableState {
            entries,
            dirty,
            index,
        } = &mut *state;
        let current = entries
            .entry(key.clone())
            .or_insert_with(|| self.persister.default_value(key));
        let mut draft = current.clone();
        let out = f(&mut draft, index)?;
        let before = std::mem::replace(current, draft);
        index.apply(key, Some(&before), current);
        dirty.insert(key.clone());
        Ok(out)
    }

    /// Runs `f` over the derived index.
    pub async fn with_index<R>(&self, f: impl FnOnce(&X) -> R + Send) -> R {
        f(&self.state.lock().await.index)
    }

    /// Runs `f` over every entry currently in memory.
    pub async fn with_entries<R>(&self, f: impl FnOnce(&HashMap<P::Key, P::Value>) -> R + Send) -> R {
        f(&self.state.lock().await.entries)
    }

    /// Number of keys waiting for the next flush.
    pub async fn dirty_len(&self) -> usize {
        self.state.lock().await.dirty.len()
    }

    /// Persists every dirty key in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns the first failing statement's error. The transaction is rolled
    /// back and the dirty set is left intact for the next attempt.
    pub async fn flush(&self) -> StoreResult<FlushReport> {
        let mut state = self.state.lock().await;
        if state.dirty.is_empty() {
            return Ok(FlushReport {
                domain: P::DOMAIN,
                written: 0,
            });
        }

        match self.write_dirty(&state).await {
            Ok(written) => {
                state.dirty.clear();
                metrics::counter!("guildkeep_flush_rows_total", "domain" => P::DOMAIN)
                    .increment(written as u64);
                debug!(domain = P::DOMAIN, rows = written, "Flushed domain");
                Ok(FlushReport {
                    domain: P::DOMAIN,
                    written,
                })
            }
            Err(err) => {
                metrics::counter!("guildkeep_flush_failures_total", "domain" => P::DOMAIN)
                    .increment(1);
                error!(
                    domain = P::DOMAIN,
                    dirty = state.dirty.len(),
                    error = %err,
                    "Flush failed; dirty keys kept for retry"
                );
                Err(err)
            }
        }
    }

    async fn write_dirty(&self, state: &TableState<P::Key, P::Value, X>) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for key in &state.dirty {
            let Some(value) = state.entries.get(key) else {
                continue;
            };
            self.persister.upsert(&mut tx, key, value).await?;
            written += 1;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn ensure_locked(&self, state: &mut TableState<P::Key, P::Value, X>, key: &P::Key) {
        if state.entries.contains_key(key) {
            return;
        }
        if P::BASE_ROW {
            self.insert_base_row(key).await;
        }
        let value = self.persister.default_value(key);
        state.index.apply(key, None, &value);
        state.entries.insert(key.clone(), value);
        state.dirty.insert(key.clone());
    }

    async fn insert_base_row(&self, key: &P::Key) {
        let result = match self.pool.acquire().await {
            Ok(mut conn) => self.persister.insert_base_row(&mut conn, key).await,
            Err(err) => Err(StoreError::from(err)),
        };
        match result {
            Ok(()) => debug!(domain = P::DOMAIN, ?key, "Inserted base row"),
            Err(err) if err.is_unique_violation() => {
                warn!(domain = P::DOMAIN, ?key, "Base row already exists");
            }
            // The key stays dirty, so the next flush probes and inserts it.
            Err(err) => error!(
                domain = P::DOMAIN,
                ?key,
                error = %err,
                "Base row insert failed"
            ),
        }
    }
}

/// Object-safe view of a table used by the flush scheduler and health checks.
#[async_trait]
pub trait Flushable: Send + Sync {
    fn domain(&self) -> &'static str;

    async fn flush(&self) -> StoreResult<FlushReport>;

    async fn dirty_len(&self) -> usize;
}

#[async_trait]
impl<P, X> Flushable for WriteBackTable<P, X>
where
    P: Persister,
    X: DerivedIndex<P::Key, P::Value> + Sync,
{
    fn domain(&self) -> &'static str {
        P::DOMAIN
    }

    async fn flush(&self) -> StoreResult<FlushReport> {
        WriteBackTable::flush(self).await
    }

    async fn dirty_len(&self) -> usize {
        WriteBackTable::dirty_len(self).await
    }
}
