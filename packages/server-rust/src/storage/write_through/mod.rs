//! Write-through domains: persisted before the mutator returns.
//!
//! These hold state that is read on every event (rule chains, blacklist) or
//! that changes rarely and must never be lost (auto-roles). Reads are
//! synchronous from concurrent maps; writers are serialized per store.

pub mod auto_roles;
pub mod blacklist;
pub mod rules;

pub use auto_roles::AutoRoleStore;
pub use blacklist::Blacklist;
pub use rules::RuleStore;
