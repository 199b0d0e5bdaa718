//! Fixed-window per-key throttle for message-triggered rewards.

use std::hash::Hash;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

/// Allows one acquisition per key per `window`.
///
/// The window starts at the successful acquisition; attempts inside it are
/// refused without extending it.
#[derive(Debug)]
pub struct Cooldown<K: Eq + Hash> {
    window: Duration,
    last: DashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> Cooldown<K> {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: DashMap::new(),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Takes the key's slot if its window has elapsed.
    pub fn try_acquire(&self, key: &K) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    pub fn try_acquire_at(&self, key: &K, now: Instant) -> bool {
        match self.last.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                if now.saturating_duration_since(*slot.get()) < self.window {
                    return false;
                }
                slot.insert(now);
                true
            }
        }
    }

    /// Time left before `key` can be acquired again. Zero if it can be now.
    #[must_use]
    pub fn remaining(&self, key: &K) -> Duration {
        self.last.get(key).map_or(Duration::ZERO, |at| {
            self.window.saturating_sub(Instant::now().saturating_duration_since(*at))
        })
    }

    /// Drops entries whose window has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.last.len();
        let now = Instant::now();
        self.last
            .retain(|_, at| now.saturating_duration_since(*at) < self.window);
        before.saturating_sub(self.last.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.last.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
