//! Operator HTTP surface: health probes, manual flush, lifecycle state.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::NetworkConfig;
pub use handlers::AppState;
pub use module::OpsServer;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
