//! Per-guild access control: the typed rule chain and its evaluator.
//!
//! The chain is evaluated last-match-wins. Administrators build policy by
//! appending increasingly specific overrides, so removing a rule by index
//! shifts every later rule down by one and can change the outcome for
//! unrelated commands.

mod evaluate;
mod rule;

pub use evaluate::{evaluate, is_always_allowed, Denial, Verdict, HELP_COMMAND, PERMISSIONS_MODULE};
pub use rule::{Rule, RuleParseError, Scope, Target};

/// The chain a guild has before any rule is added, and after a clear.
#[must_use]
pub fn default_chain() -> Vec<Rule> {
    vec![Rule::allow_all()]
}
