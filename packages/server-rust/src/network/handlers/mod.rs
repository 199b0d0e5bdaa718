//! Operator endpoint handlers and the state they share.

pub mod admin;
pub mod health;

pub use admin::flush_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::service::StateCache;

/// Shared state passed to every handler via `State` extraction. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<StateCache>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Process start time, used for uptime.
    pub start_time: Instant,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::service::StateConfig;
    use crate::storage::BackingStore;

    pub(crate) async fn app_state(admin_token: Option<&str>) -> AppState {
        let store = BackingStore::in_memory().await.unwrap();
        let cache = StateCache::with_store(store, StateConfig::default()).await.unwrap();
        AppState {
            cache: Arc::new(cache),
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(NetworkConfig {
                admin_token: admin_token.map(str::to_string),
                ..NetworkConfig::default()
            }),
            start_time: Instant::now(),
        }
    }
}
