//! What a command does, and to whom.
//!
//! Each variant carries exactly the target fields its kind needs. Construction
//! goes through the associated functions below, which reject missing required
//! targets.

use serde::{Deserialize, Serialize};

use statusq_core::{AccountName, DomainError, DomainResult, DownloadId, MessageId, OriginId, UserId};

use crate::context::CommandContext;
use crate::kind::CommandKind;

const EXCERPT_CHARS: usize = 40;

/// Timeline a fetch command downloads.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineType {
    #[default]
    Home,
    Mentions,
    Direct,
    Favorites,
    Public,
}

impl TimelineType {
    pub fn as_str(self) -> &'static str {
        match self {
            TimelineType::Home => "home",
            TimelineType::Mentions => "mentions",
            TimelineType::Direct => "direct",
            TimelineType::Favorites => "favorites",
            TimelineType::Public => "public",
        }
    }
}

/// What a search command looks for.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchObjects {
    #[default]
    Messages,
    Users,
}

impl SearchObjects {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchObjects::Messages => "messages",
            SearchObjects::Users => "users",
        }
    }
}

/// A unit of remote work together with its target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    Empty,
    UpdateStatus {
        account: Option<AccountName>,
        message: MessageId,
    },
    DestroyStatus {
        account: AccountName,
        message: MessageId,
    },
    GetStatus {
        account: Option<AccountName>,
        message: Option<MessageId>,
    },
    Like {
        account: AccountName,
        message: MessageId,
    },
    Unlike {
        account: AccountName,
        message: MessageId,
    },
    Reblog {
        account: AccountName,
        message: MessageId,
    },
    FollowUser {
        account: Option<AccountName>,
        origin: OriginId,
        user: UserId,
    },
    StopFollowingUser {
        account: Option<AccountName>,
        origin: OriginId,
        user: UserId,
    },
    FetchTimeline {
        timeline: TimelineType,
        account: Option<AccountName>,
        origin: Option<OriginId>,
    },
    Search {
        objects: SearchObjects,
        origin: Option<OriginId>,
        query: String,
    },
    FetchAttachment {
        message: MessageId,
        download: DownloadId,
    },
    FetchAvatar {
        user: UserId,
    },
    RateLimitStatus {
        account: Option<AccountName>,
    },
}

fn require_message(kind: CommandKind, message: MessageId) -> DomainResult<()> {
    if message.is_set() {
        Ok(())
    } else {
        Err(DomainError::validation(format!("{kind} requires a message id")))
    }
}

fn require_user(kind: CommandKind, origin: OriginId, user: UserId) -> DomainResult<()> {
    if !origin.is_set() {
        return Err(DomainError::validation(format!("{kind} requires an origin")));
    }
    if !user.is_set() {
        return Err(DomainError::validation(format!("{kind} requires a user id")));
    }
    Ok(())
}

impl Command {
    pub fn update_status(account: Option<AccountName>, message: MessageId) -> DomainResult<Self> {
        require_message(CommandKind::UpdateStatus, message)?;
        Ok(Self::UpdateStatus { account, message })
    }

    pub fn destroy_status(account: AccountName, message: MessageId) -> DomainResult<Self> {
        require_message(CommandKind::DestroyStatus, message)?;
        Ok(Self::DestroyStatus { account, message })
    }

    pub fn get_status(account: Option<AccountName>, message: Option<MessageId>) -> Self {
        Self::GetStatus {
            account,
            message: message.filter(|m| m.is_set()),
        }
    }

    pub fn like(account: AccountName, message: MessageId) -> DomainResult<Self> {
        require_message(CommandKind::Like, message)?;
        Ok(Self::Like { account, message })
    }

    pub fn unlike(account: AccountName, message: MessageId) -> DomainResult<Self> {
        require_message(CommandKind::Unlike, message)?;
        Ok(Self::Unlike { account, message })
    }

    pub fn reblog(account: AccountName, message: MessageId) -> DomainResult<Self> {
        require_message(CommandKind::Reblog, message)?;
        Ok(Self::Reblog { account, message })
    }

    pub fn follow_user(
        account: Option<AccountName>,
        origin: OriginId,
        user: UserId,
    ) -> DomainResult<Self> {
        require_user(CommandKind::FollowUser, origin, user)?;
        Ok(Self::FollowUser {
            account,
            origin,
            user,
        })
    }

    pub fn stop_following_user(
        account: Option<AccountName>,
        origin: OriginId,
        user: UserId,
    ) -> DomainResult<Self> {
        require_user(CommandKind::StopFollowingUser, origin, user)?;
        Ok(Self::StopFollowingUser {
            account,
            origin,
            user,
        })
    }

    /// Build a user-targeted command of the given kind.
    pub fn user_command(
        kind: CommandKind,
        account: Option<AccountName>,
        origin: OriginId,
        user: UserId,
    ) -> DomainResult<Self> {
        match kind {
            CommandKind::FollowUser => Self::follow_user(account, origin, user),
            CommandKind::StopFollowingUser => Self::stop_following_user(account, origin, user),
            CommandKind::FetchAvatar => Self::fetch_avatar(user),
            other => Err(DomainError::validation(format!(
                "{other} is not a user command"
            ))),
        }
    }

    pub fn fetch_timeline(
        timeline: TimelineType,
        account: Option<AccountName>,
        origin: Option<OriginId>,
    ) -> Self {
        Self::FetchTimeline {
            timeline,
            account,
            origin: origin.filter(|o| o.is_set()),
        }
    }

    pub fn search(
        objects: SearchObjects,
        origin: Option<OriginId>,
        query: impl AsRef<str>,
    ) -> DomainResult<Self> {
        let query = query.as_ref().trim();
        if query.is_empty() {
            return Err(DomainError::validation("search requires a query"));
        }
        Ok(Self::Search {
            objects,
            origin: origin.filter(|o| o.is_set()),
            query: query.to_string(),
        })
    }

    pub fn fetch_attachment(message: MessageId, download: DownloadId) -> DomainResult<Self> {
        require_message(CommandKind::FetchAttachment, message)?;
        if !download.is_set() {
            return Err(DomainError::validation(
                "fetch_attachment requires a download row id",
            ));
        }
        Ok(Self::FetchAttachment { message, download })
    }

    pub fn fetch_avatar(user: UserId) -> DomainResult<Self> {
        if !user.is_set() {
            return Err(DomainError::validation("fetch_avatar requires a user id"));
        }
        Ok(Self::FetchAvatar { user })
    }

    pub fn rate_limit_status(account: Option<AccountName>) -> Self {
        Self::RateLimitStatus { account }
    }

    /// Generic factory for kinds whose target fields are all optional.
    pub fn command(kind: CommandKind) -> DomainResult<Self> {
        match kind {
            CommandKind::Empty => Ok(Self::Empty),
            CommandKind::FetchTimeline => Ok(Self::fetch_timeline(TimelineType::Home, None, None)),
            CommandKind::GetStatus => Ok(Self::get_status(None, None)),
            CommandKind::RateLimitStatus => Ok(Self::rate_limit_status(None)),
            other => Err(DomainError::validation(format!(
                "{other} cannot be created without a target"
            ))),
        }
    }

    /// Re-run the factory checks on an already built value.
    pub fn validate(&self) -> DomainResult<()> {
        match self {
            Command::UpdateStatus { message, .. } => {
                require_message(CommandKind::UpdateStatus, *message)
            }
            Command::DestroyStatus { message, .. }
            | Command::Like { message, .. }
            | Command::Unlike { message, .. }
            | Command::Reblog { message, .. } => require_message(self.kind(), *message),
            Command::FollowUser { origin, user, .. }
            | Command::StopFollowingUser { origin, user, .. } => {
                require_user(self.kind(), *origin, *user)
            }
            Command::Search { query, .. } if query.trim().is_empty() => {
                Err(DomainError::validation("search requires a query"))
            }
            Command::FetchAttachment { message, download } => {
                Self::fetch_attachment(*message, *download).map(|_| ())
            }
            Command::FetchAvatar { user } => Self::fetch_avatar(*user).map(|_| ()),
            Command::Empty
            | Command::GetStatus { .. }
            | Command::FetchTimeline { .. }
            | Command::Search { .. }
            | Command::RateLimitStatus { .. } => Ok(()),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Empty => CommandKind::Empty,
            Command::UpdateStatus { .. } => CommandKind::UpdateStatus,
            Command::DestroyStatus { .. } => CommandKind::DestroyStatus,
            Command::GetStatus { .. } => CommandKind::GetStatus,
            Command::Like { .. } => CommandKind::Like,
            Command::Unlike { .. } => CommandKind::Unlike,
            Command::Reblog { .. } => CommandKind::Reblog,
            Command::FollowUser { .. } => CommandKind::FollowUser,
            Command::StopFollowingUser { .. } => CommandKind::StopFollowingUser,
            Command::FetchTimeline { .. } => CommandKind::FetchTimeline,
            Command::Search { .. } => CommandKind::Search,
            Command::FetchAttachment { .. } => CommandKind::FetchAttachment,
            Command::FetchAvatar { .. } => CommandKind::FetchAvatar,
            Command::RateLimitStatus { .. } => CommandKind::RateLimitStatus,
        }
    }

    pub fn account(&self) -> Option<&AccountName> {
        match self {
            Command::DestroyStatus { account, .. }
            | Command::Like { account, .. }
            | Command::Unlike { account, .. }
            | Command::Reblog { account, .. } => Some(account),
            Command::UpdateStatus { account, .. }
            | Command::GetStatus { account, .. }
            | Command::FollowUser { account, .. }
            | Command::StopFollowingUser { account, .. }
            | Command::FetchTimeline { account, .. }
            | Command::RateLimitStatus { account } => account.as_ref(),
            Command::Empty
            | Command::Search { .. }
            | Command::FetchAttachment { .. }
            | Command::FetchAvatar { .. } => None,
        }
    }

    pub fn origin(&self) -> Option<OriginId> {
        match self {
            Command::FollowUser { origin, .. } | Command::StopFollowingUser { origin, .. } => {
                Some(*origin)
            }
            Command::FetchTimeline { origin, .. } | Command::Search { origin, .. } => *origin,
            _ => None,
        }
    }

    pub fn user(&self) -> Option<UserId> {
        match self {
            Command::FollowUser { user, .. }
            | Command::StopFollowingUser { user, .. }
            | Command::FetchAvatar { user } => Some(*user),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<MessageId> {
        match self {
            Command::UpdateStatus { message, .. }
            | Command::DestroyStatus { message, .. }
            | Command::Like { message, .. }
            | Command::Unlike { message, .. }
            | Command::Reblog { message, .. }
            | Command::FetchAttachment { message, .. } => Some(*message),
            Command::GetStatus { message, .. } => *message,
            _ => None,
        }
    }

    pub fn search_query(&self) -> Option<&str> {
        match self {
            Command::Search { query, .. } => Some(query),
            _ => None,
        }
    }

    /// Describe the first account, origin or user reference that no longer
    /// resolves in `ctx`. Messages are not checked: they may not be
    /// downloaded yet.
    pub fn unresolved_reference(&self, ctx: &dyn CommandContext) -> Option<String> {
        if let Some(account) = self.account() {
            if !ctx.has_account(account) {
                return Some(format!("account {account}"));
            }
        }
        if let Some(origin) = self.origin() {
            if ctx.origin_name(origin).is_none() {
                return Some(format!("origin #{origin}"));
            }
        }
        if let Some(user) = self.user() {
            if ctx.user_handle(user).is_none() {
                return Some(format!("user #{user}"));
            }
        }
        None
    }

    /// Human-readable rendering of kind + target. Never fails: references that
    /// do not resolve are shown by their row id.
    pub fn summary(&self, ctx: &dyn CommandContext) -> String {
        let kind = self.kind();
        let mut text = String::from(kind.title());

        match self {
            Command::Empty | Command::RateLimitStatus { .. } => {}
            Command::UpdateStatus { message, .. }
            | Command::DestroyStatus { message, .. }
            | Command::Like { message, .. }
            | Command::Unlike { message, .. }
            | Command::Reblog { message, .. } => {
                text.push(' ');
                text.push_str(&render_message(ctx, *message));
            }
            Command::GetStatus { message, .. } => {
                if let Some(message) = message {
                    text.push(' ');
                    text.push_str(&render_message(ctx, *message));
                }
            }
            Command::FollowUser { user, .. }
            | Command::StopFollowingUser { user, .. }
            | Command::FetchAvatar { user } => {
                text.push(' ');
                text.push_str(&render_user(ctx, *user));
            }
            Command::FetchTimeline { timeline, .. } => {
                text.push(' ');
                text.push_str(timeline.as_str());
            }
            Command::Search { objects, query, .. } => {
                text.push_str(&format!(" {} '{}'", objects.as_str(), query));
            }
            Command::FetchAttachment { message, download } => {
                text.push_str(&format!(" #{download} of {}", render_message(ctx, *message)));
            }
        }

        if let Some(origin) = self.origin() {
            let name = ctx
                .origin_name(origin)
                .unwrap_or_else(|| format!("origin #{origin}"));
            text.push_str(" on ");
            text.push_str(&name);
        }
        if let Some(account) = self.account() {
            text.push_str("; account: ");
            text.push_str(account.as_str());
        }
        text
    }
}

fn render_user(ctx: &dyn CommandContext, user: UserId) -> String {
    ctx.user_handle(user)
        .unwrap_or_else(|| format!("user #{user}"))
}

fn render_message(ctx: &dyn CommandContext, message: MessageId) -> String {
    match ctx.message_excerpt(message) {
        Some(body) => {
            let mut excerpt: String = body.chars().take(EXCERPT_CHARS).collect();
            if body.chars().count() > EXCERPT_CHARS {
                excerpt.push('…');
            }
            format!("'{excerpt}'")
        }
        None => format!("message #{message}"),
    }
}
