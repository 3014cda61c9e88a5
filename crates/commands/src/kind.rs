//! Command kinds and their scheduling tiers.

use serde::{Deserialize, Serialize};

/// Scheduling tier derived from a command kind. Lower tiers are served first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    /// Actions the user is waiting on: posting, deleting, liking, following.
    UserAction = 0,
    /// Syncing the state of a single status or of the account itself.
    Sync = 1,
    /// Timeline and search downloads.
    Background = 2,
    /// Everything else (attachments, avatars, no-op commands).
    Other = 3,
}

/// Field-less discriminant of [`Command`](crate::Command).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Empty,
    UpdateStatus,
    DestroyStatus,
    GetStatus,
    Like,
    Unlike,
    Reblog,
    FollowUser,
    StopFollowingUser,
    FetchTimeline,
    Search,
    FetchAttachment,
    FetchAvatar,
    RateLimitStatus,
}

impl CommandKind {
    pub const ALL: [CommandKind; 14] = [
        CommandKind::Empty,
        CommandKind::UpdateStatus,
        CommandKind::DestroyStatus,
        CommandKind::GetStatus,
        CommandKind::Like,
        CommandKind::Unlike,
        CommandKind::Reblog,
        CommandKind::FollowUser,
        CommandKind::StopFollowingUser,
        CommandKind::FetchTimeline,
        CommandKind::Search,
        CommandKind::FetchAttachment,
        CommandKind::FetchAvatar,
        CommandKind::RateLimitStatus,
    ];

    pub fn priority(self) -> PriorityTier {
        match self {
            CommandKind::UpdateStatus
            | CommandKind::DestroyStatus
            | CommandKind::Like
            | CommandKind::Unlike
            | CommandKind::Reblog
            | CommandKind::FollowUser
            | CommandKind::StopFollowingUser => PriorityTier::UserAction,
            CommandKind::GetStatus | CommandKind::RateLimitStatus => PriorityTier::Sync,
            CommandKind::FetchTimeline | CommandKind::Search => PriorityTier::Background,
            CommandKind::FetchAttachment | CommandKind::FetchAvatar | CommandKind::Empty => {
                PriorityTier::Other
            }
        }
    }

    /// Display title used in summaries shown to the user.
    pub fn title(self) -> &'static str {
        match self {
            CommandKind::Empty => "Empty",
            CommandKind::UpdateStatus => "Update status",
            CommandKind::DestroyStatus => "Delete status",
            CommandKind::GetStatus => "Get status",
            CommandKind::Like => "Like",
            CommandKind::Unlike => "Undo like",
            CommandKind::Reblog => "Reblog",
            CommandKind::FollowUser => "Follow",
            CommandKind::StopFollowingUser => "Stop following",
            CommandKind::FetchTimeline => "Fetch timeline",
            CommandKind::Search => "Search",
            CommandKind::FetchAttachment => "Download attachment",
            CommandKind::FetchAvatar => "Download avatar",
            CommandKind::RateLimitStatus => "Rate limit status",
        }
    }

    /// Stable snake_case name, the same one used in persisted queues.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Empty => "empty",
            CommandKind::UpdateStatus => "update_status",
            CommandKind::DestroyStatus => "destroy_status",
            CommandKind::GetStatus => "get_status",
            CommandKind::Like => "like",
            CommandKind::Unlike => "unlike",
            CommandKind::Reblog => "reblog",
            CommandKind::FollowUser => "follow_user",
            CommandKind::StopFollowingUser => "stop_following_user",
            CommandKind::FetchTimeline => "fetch_timeline",
            CommandKind::Search => "search",
            CommandKind::FetchAttachment => "fetch_attachment",
            CommandKind::FetchAvatar => "fetch_avatar",
            CommandKind::RateLimitStatus => "rate_limit_status",
        }
    }

    /// Search results are only useful while the user is looking at them, so a
    /// failed search is reported instead of being retried later.
    pub fn is_retryable(self) -> bool {
        !matches!(self, CommandKind::Search)
    }
}

impl core::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
