//! Typed access-control rules and their canonical text form.
//!
//! A rule is a `(scope, target, enabled)` triple. The text form is what gets
//! persisted (one row per rule) and what is shown to operators when a rule
//! denies a command:
//!
//! ```text
//! all-server disable
//! all-channel enable 1234
//! server-command disable ping
//! role-module enable economy 77
//! ```
//!
//! Blanket rules use `all-<scope>`, module and command rules use
//! `<scope>-module` / `<scope>-command`. The module or command name comes
//! before the scope id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::context::InvocationContext;
use crate::ids::{CategoryId, ChannelId, RoleId, UserId};

/// Where a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// The whole guild.
    Server,
    Channel(ChannelId),
    Category(CategoryId),
    /// Members holding the role.
    Role(RoleId),
    User(UserId),
}

impl Scope {
    const fn keyword(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Channel(_) => "channel",
            Self::Category(_) => "category",
            Self::Role(_) => "role",
            Self::User(_) => "user",
        }
    }

    fn id(&self) -> Option<u64> {
        match *self {
            Self::Server => None,
            Self::Channel(id) => Some(id.get()),
            Self::Category(id) => Some(id.get()),
            Self::Role(id) => Some(id.get()),
            Self::User(id) => Some(id.get()),
        }
    }

    /// Whether the invocation happens inside this scope.
    #[must_use]
    pub fn contains(&self, ctx: &InvocationContext) -> bool {
        match *self {
            Self::Server => true,
            Self::Channel(id) => ctx.channel_id == id,
            Self::Category(id) => ctx.category_id == Some(id),
            Self::Role(id) => ctx.has_role(id),
            Self::User(id) => ctx.user_id == id,
        }
    }
}

/// What a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// Every command of every module.
    All,
    /// Every command owned by the named module.
    Module(String),
    /// One command by name.
    Command(String),
}

impl Target {
    /// Whether the invoked command falls under this target.
    #[must_use]
    pub fn covers(&self, ctx: &InvocationContext) -> bool {
        match self {
            Self::All => true,
            Self::Module(name) => name.eq_ignore_ascii_case(&ctx.module),
            Self::Command(name) => name.eq_ignore_ascii_case(&ctx.command),
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Module(name) | Self::Command(name) => Some(name),
        }
    }
}

/// One entry of a guild's permission chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub scope: Scope,
    pub target: Target,
    /// `true` allows matching invocations, `false` denies them.
    pub enabled: bool,
}

impl Rule {
    #[must_use]
    pub fn new(scope: Scope, target: Target, enabled: bool) -> Self {
        Self {
            scope,
            target,
            enabled,
        }
    }

    /// `all-server enable`: the single rule of a freshly cleared chain.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::new(Scope::Server, Target::All, true)
    }

    /// Blanket rule for every command within `scope`.
    #[must_use]
    pub fn all(scope: Scope, enabled: bool) -> Self {
        Self::new(scope, Target::All, enabled)
    }

    /// Rule for every command of `module` within `scope`.
    #[must_use]
    pub fn module(scope: Scope, module: impl Into<String>, enabled: bool) -> Self {
        Self::new(scope, Target::Module(module.into().to_ascii_lowercase()), enabled)
    }

    /// Rule for a single `command` within `scope`.
    #[must_use]
    pub fn command(scope: Scope, command: impl Into<String>, enabled: bool) -> Self {
        Self::new(scope, Target::Command(command.into().to_ascii_lowercase()), enabled)
    }

    /// Checks that the text form parses back to this rule.
    ///
    /// Module and command names must be non-empty, lowercase and free of
    /// whitespace, since the text form is split on whitespace.
    ///
    /// # Errors
    ///
    /// [`RuleParseError::InvalidName`] for a name that would not survive a
    /// round trip through storage.
    pub fn validate(&self) -> Result<(), RuleParseError> {
        match self.target.name() {
            Some(name) if !is_valid_name(name) => Err(RuleParseError::InvalidName(name.to_string())),
            _ => Ok(()),
        }
    }

    /// Whether this rule applies to the invocation.
    #[must_use]
    pub fn matches(&self, ctx: &InvocationContext) -> bool {
        self.scope.contains(ctx) && self.target.covers(ctx)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = self.scope.keyword();
        match self.target {
            Target::All => write!(f, "all-{scope}")?,
            Target::Module(_) => write!(f, "{scope}-module")?,
            Target::Command(_) => write!(f, "{scope}-command")?,
        }
        f.write_str(if self.enabled { " enable" } else { " disable" })?;
        if let Some(name) = self.target.name() {
            write!(f, " {name}")?;
        }
        if let Some(id) = self.scope.id() {
            write!(f, " {id}")?;
        }
        Ok(())
    }
}

/// Errors produced when parsing the text form of a [`Rule`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    #[error("empty rule")]
    Empty,
    #[error("unknown rule kind: {0}")]
    UnknownKind(String),
    #[error("expected enable or disable, got: {0}")]
    UnknownState(String),
    #[error("missing state (enable/disable)")]
    MissingState,
    #[error("{kind} rule needs a module or command name")]
    MissingName { kind: String },
    #[error("{kind} rule needs a target id")]
    MissingId { kind: String },
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("unexpected trailing input: {0}")]
    Trailing(String),
    #[error("invalid module or command name: {0:?}")]
    InvalidName(String),
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.chars().any(char::is_whitespace)
        && !name.chars().any(|c| c.is_ascii_uppercase())
}

#[derive(Clone, Copy)]
enum ScopeKind {
    Server,
    Channel,
    Category,
    Role,
    User,
}

#[derive(Clone, Copy)]
enum TargetKind {
    All,
    Module,
    Command,
}

fn parse_scope_kind(s: &str) -> Option<ScopeKind> {
    Some(match s {
        "server" => ScopeKind::Server,
        "channel" => ScopeKind::Channel,
        "category" => ScopeKind::Category,
        "role" => ScopeKind::Role,
        "user" => ScopeKind::User,
        _ => return None,
    })
}

fn parse_kind(kind: &str) -> Option<(ScopeKind, TargetKind)> {
    let (left, right) = kind.split_once('-')?;
    if left == "all" {
        return parse_scope_kind(right).map(|s| (s, TargetKind::All));
    }
    let target = match right {
        "module" => TargetKind::Module,
        "command" => TargetKind::Command,
        _ => return None,
    };
    parse_scope_kind(left).map(|s| (s, target))
}

impl FromStr for Rule {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace();
        let kind = tokens.next().ok_or(RuleParseError::Empty)?;
        let (scope_kind, target_kind) =
            parse_kind(kind).ok_or_else(|| RuleParseError::UnknownKind(kind.to_string()))?;

        let enabled = match tokens.next() {
            Some("enable") => true,
            Some("disable") => false,
            Some(other) => return Err(RuleParseError::UnknownState(other.to_string())),
            None => return Err(RuleParseError::MissingState),
        };

        let target = match target_kind {
            TargetKind::All => Target::All,
            TargetKind::Module | TargetKind::Command => {
                let name = tokens
                    .next()
                    .ok_or_else(|| RuleParseError::MissingName {
                        kind: kind.to_string(),
                    })?
                    .to_ascii_lowercase();
                if matches!(target_kind, TargetKind::Module) {
                    Target::Module(name)
                } else {
                    Target::Command(name)
                }
            }
        };

        let scope = if let ScopeKind::Server = scope_kind {
            Scope::Server
        } else {
            let raw = tokens.next().ok_or_else(|| RuleParseError::MissingId {
                kind: kind.to_string(),
            })?;
            let id: u64 = raw
                .parse()
                .map_err(|_| RuleParseError::InvalidId(raw.to_string()))?;
            match scope_kind {
                ScopeKind::Channel => Scope::Channel(ChannelId(id)),
                ScopeKind::Category => Scope::Category(CategoryId(id)),
                ScopeKind::Role => Scope::Role(RoleId(id)),
                ScopeKind::User => Scope::User(UserId(id)),
                ScopeKind::Server => Scope::Server,
            }
        };

        let rest: Vec<&str> = tokens.collect();
        if !rest.is_empty() {
            return Err(RuleParseError::Trailing(rest.join(" ")));
        }

        Ok(Self::new(scope, target, enabled))
    }
}
