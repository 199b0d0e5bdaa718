//! Last-match-wins evaluation of a permission chain.

use std::fmt;

use crate::context::InvocationContext;

use super::rule::Rule;

/// Command that is never subject to the rule chain.
pub const HELP_COMMAND: &str = "help";
/// Module whose commands manage the rule chain; never subject to it.
pub const PERMISSIONS_MODULE: &str = "permissions";

/// The rule that denied an invocation, reported back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Position of the rule in the chain.
    pub index: usize,
    pub rule: Rule,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "denied by rule #{}: {}", self.index, self.rule)
    }
}

/// Outcome of evaluating a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Allowed. `matched` is the deciding rule, `None` when nothing matched.
    Allow { matched: Option<usize> },
    Deny(Denial),
}

impl Verdict {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// Index of the deciding rule, if any rule matched.
    #[must_use]
    pub fn matched_index(&self) -> Option<usize> {
        match self {
            Self::Allow { matched } => *matched,
            Self::Deny(denial) => Some(denial.index),
        }
    }
}

/// Evaluates `chain` for `ctx`.
///
/// Scans once from index 0 upward; every matching rule overwrites the
/// decision, so the highest-index match decides. No match means allow.
/// There is no specificity ordering: a later `all-server disable` overrides
/// an earlier `channel-command enable`.
#[must_use]
pub fn evaluate(ctx: &InvocationContext, chain: &[Rule]) -> Verdict {
    let mut decision = true;
    let mut matched = None;

    for (index, rule) in chain.iter().enumerate() {
        if rule.matches(ctx) {
            decision = rule.enabled;
            matched = Some(index);
        }
    }

    match matched {
        Some(index) if !decision => Verdict::Deny(Denial {
            index,
            rule: chain[index].clone(),
        }),
        _ => Verdict::Allow { matched },
    }
}

/// Whether the invocation bypasses the chain entirely.
///
/// `help` and everything in the permissions module stay reachable so that
/// operators cannot lock themselves out of fixing a bad chain.
#[must_use]
pub fn is_always_allowed(ctx: &InvocationContext) -> bool {
    ctx.command.eq_ignore_ascii_case(HELP_COMMAND)
        || ctx.module.eq_ignore_ascii_case(PERMISSIONS_MODULE)
}
