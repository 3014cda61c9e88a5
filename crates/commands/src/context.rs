//! Explicit lookup context for command targets.
//!
//! Callers own the context and pass it into every operation that needs to
//! resolve an account, origin or user. There is no process-wide "current"
//! context.

use std::collections::{HashMap, HashSet};

use statusq_core::{AccountName, MessageId, OriginId, UserId};

/// Read-only view of the accounts and records a command may refer to.
pub trait CommandContext: Send + Sync {
    /// Whether the account is still configured.
    fn has_account(&self, account: &AccountName) -> bool;

    /// Display name of an origin (social network instance), if it still exists.
    fn origin_name(&self, origin: OriginId) -> Option<String>;

    /// Resolved handle (webfinger id) of a user, if the user is known.
    fn user_handle(&self, user: UserId) -> Option<String>;

    /// Short excerpt of a message body, used only for display.
    fn message_excerpt(&self, _message: MessageId) -> Option<String> {
        None
    }
}

impl<C: CommandContext + ?Sized> CommandContext for std::sync::Arc<C> {
    fn has_account(&self, account: &AccountName) -> bool {
        (**self).has_account(account)
    }

    fn origin_name(&self, origin: OriginId) -> Option<String> {
        (**self).origin_name(origin)
    }

    fn user_handle(&self, user: UserId) -> Option<String> {
        (**self).user_handle(user)
    }

    fn message_excerpt(&self, message: MessageId) -> Option<String> {
        (**self).message_excerpt(message)
    }
}

/// In-memory context for tests, tools and single-process setups.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContext {
    accounts: HashSet<AccountName>,
    origins: HashMap<OriginId, String>,
    users: HashMap<UserId, String>,
    messages: HashMap<MessageId, String>,
}

impl InMemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, account: AccountName) -> Self {
        self.accounts.insert(account);
        self
    }

    pub fn with_origin(mut self, origin: OriginId, name: impl Into<String>) -> Self {
        self.origins.insert(origin, name.into());
        self
    }

    pub fn with_user(mut self, user: UserId, handle: impl Into<String>) -> Self {
        self.users.insert(user, handle.into());
        self
    }

    pub fn with_message(mut self, message: MessageId, body: impl Into<String>) -> Self {
        self.messages.insert(message, body.into());
        self
    }

    pub fn remove_account(&mut self, account: &AccountName) -> bool {
        self.accounts.remove(account)
    }

    pub fn remove_origin(&mut self, origin: OriginId) -> bool {
        self.origins.remove(&origin).is_some()
    }
}

impl CommandContext for InMemoryContext {
    fn has_account(&self, account: &AccountName) -> bool {
        self.accounts.contains(account)
    }

    fn origin_name(&self, origin: OriginId) -> Option<String> {
        self.origins.get(&origin).cloned()
    }

    fn user_handle(&self, user: UserId) -> Option<String> {
        self.users.get(&user).cloned()
    }

    fn message_excerpt(&self, message: MessageId) -> Option<String> {
        self.messages.get(&message).cloned()
    }
}
