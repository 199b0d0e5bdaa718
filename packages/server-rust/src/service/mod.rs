//! Services built on the storage layer.
//!
//! 1. **State cache** (`state`): every domain behind one handle, plus
//!    message accrual and the flush-all entry point
//! 2. **Gate** (`gate`): the pre-dispatch permission check
//! 3. **Cooldowns** (`cooldown`): per-key reward throttling
//! 4. **Background workers** (`worker`, `flush`): the periodic flush loop

pub mod config;
pub mod cooldown;
pub mod flush;
pub mod gate;
pub mod state;
pub mod worker;

pub use config::StateConfig;
pub use cooldown::Cooldown;
pub use flush::{FlushRunnable, FlushScheduler, FlushTask};
pub use gate::{GateDecision, PermissionGate};
pub use state::{Accrual, FlushFailure, FlushSummary, StateCache};
pub use worker::{BackgroundRunnable, BackgroundWorker};
