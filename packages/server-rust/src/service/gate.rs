//! Pre-dispatch permission check.

use std::sync::Arc;

use guildkeep_core::permission::{evaluate, is_always_allowed, Denial, Verdict};
use guildkeep_core::InvocationContext;
use tracing::debug;

use crate::storage::write_through::{Blacklist, RuleStore};

/// Outcome of [`PermissionGate::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Dispatch the command.
    Allow,
    /// Do not dispatch; the denial may be shown to the user.
    Deny(Denial),
    /// Do not dispatch and do not respond.
    Ignore,
}

impl GateDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Runs before every command. Never touches the backing store.
#[derive(Clone)]
pub struct PermissionGate {
    rules: Arc<RuleStore>,
    blacklist: Arc<Blacklist>,
}

impl PermissionGate {
    #[must_use]
    pub fn new(rules: Arc<RuleStore>, blacklist: Arc<Blacklist>) -> Self {
        Self { rules, blacklist }
    }

    /// Blacklisted users are ignored before anything else. The help command
    /// and the permission-administration module are always allowed so a
    /// guild cannot lock its operators out. Everything else goes through the
    /// guild's rule chain.
    #[must_use]
    pub fn check(&self, ctx: &InvocationContext) -> GateDecision {
        if self.blacklist.contains(ctx.user_id) {
            return GateDecision::Ignore;
        }
        if is_always_allowed(ctx) {
            return GateDecision::Allow;
        }

        let chain = self.rules.get(ctx.guild_id);
        match evaluate(ctx, &chain) {
            Verdict::Allow { .. } => GateDecision::Allow,
            Verdict::Deny(denial) => {
                debug!(
                    guild = %ctx.guild_id,
                    user = %ctx.user_id,
                    command = %ctx.command,
                    index = denial.index,
                    "Command denied"
                );
                GateDecision::Deny(denial)
            }
        }
    }
}
