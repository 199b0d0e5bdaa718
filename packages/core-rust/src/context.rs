use crate::ids::{CategoryId, ChannelId, GuildId, RoleId, UserId};

/// Per-invocation context handed to the permission gate before a command runs.
/// Built by the command-dispatch layer from the inbound platform event.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Guild the command was invoked in.
    pub guild_id: GuildId,
    /// Invoking user.
    pub user_id: UserId,
    /// Roles the invoking member currently holds.
    pub role_ids: Vec<RoleId>,
    /// Channel the command was invoked in.
    pub channel_id: ChannelId,
    /// Category of that channel. `None` for uncategorized channels.
    pub category_id: Option<CategoryId>,
    /// Name of the invoked command (e.g. `"ping"`).
    pub command: String,
    /// Name of the module owning the command (e.g. `"economy"`).
    pub module: String,
}

impl InvocationContext {
    /// Creates a context with no roles and no category.
    #[must_use]
    pub fn new(
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
        command: impl Into<String>,
        module: impl Into<String>,
    ) -> Self {
        Self {
            guild_id,
            user_id,
            role_ids: Vec::new(),
            channel_id,
            category_id: None,
            command: command.into(),
            module: module.into(),
        }
    }

    /// Sets the member's roles.
    #[must_use]
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = RoleId>) -> Self {
        self.role_ids = roles.into_iter().collect();
        self
    }

    /// Sets the channel category.
    #[must_use]
    pub fn with_category(mut self, category: CategoryId) -> Self {
        self.category_id = Some(category);
        self
    }

    /// Whether the invoking member holds `role`.
    #[must_use]
    pub fn has_role(&self, role: RoleId) -> bool {
        self.role_ids.contains(&role)
    }
}
