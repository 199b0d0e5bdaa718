//! `guildkeep` server: write-back state cache over SQLite, write-through
//! permission chains, the pre-dispatch permission gate, and the operator
//! HTTP surface.

pub mod error;
pub mod network;
pub mod service;
pub mod storage;

pub use error::{StateError, StoreError, StoreResult};
pub use service::{GateDecision, PermissionGate, StateCache, StateConfig};
pub use storage::BackingStore;
