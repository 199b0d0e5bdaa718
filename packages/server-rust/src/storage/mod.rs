//! Persistence layer.
//!
//! - [`BackingStore`]: the single SQLite connection, schema creation and
//!   versioned migrations.
//! - [`WriteBackTable`]: generic in-memory domain with dirty tracking,
//!   instantiated per state domain in [`domains`].
//! - [`write_through`]: domains persisted synchronously on every mutation
//!   (rule chains, auto-roles, blacklist).

pub mod backing;
pub mod domains;
pub mod migrations;
pub mod write_back;
pub mod write_through;

pub use backing::BackingStore;
pub use migrations::{Migration, MIGRATIONS};
pub use write_back::{DerivedIndex, FlushReport, Flushable, NoIndex, Persister, WriteBackTable};
