//! A schedulable command instance.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use statusq_core::{AccountName, CommandId, DomainResult, DownloadId, MessageId, OriginId, UserId};

use crate::command::{Command, SearchObjects, TimelineType};
use crate::context::CommandContext;
use crate::kind::{CommandKind, PriorityTier};
use crate::outcome::ExecutionOutcome;

/// One piece of background work: a [`Command`] plus its execution record.
///
/// Equality and hashing consider only the command. `id`, `created_at` and the
/// outcome are bookkeeping of this particular instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandUnit {
    id: CommandId,
    command: Command,
    created_at: DateTime<Utc>,
    #[serde(default)]
    outcome: ExecutionOutcome,
}

impl PartialEq for CommandUnit {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command
    }
}

impl Eq for CommandUnit {}

impl Hash for CommandUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.command.hash(state);
    }
}

impl CommandUnit {
    /// Wrap an already built command, re-checking its required targets.
    pub fn from_command(command: Command) -> DomainResult<Self> {
        command.validate()?;
        Ok(Self::fresh(command))
    }

    fn fresh(command: Command) -> Self {
        Self {
            id: CommandId::new(),
            command,
            created_at: Utc::now(),
            outcome: ExecutionOutcome::new(),
        }
    }

    pub fn update_status(account: Option<AccountName>, message: MessageId) -> DomainResult<Self> {
        Command::update_status(account, message).map(Self::fresh)
    }

    pub fn destroy_status(account: AccountName, message: MessageId) -> DomainResult<Self> {
        Command::destroy_status(account, message).map(Self::fresh)
    }

    pub fn get_status(account: Option<AccountName>, message: Option<MessageId>) -> Self {
        Self::fresh(Command::get_status(account, message))
    }

    pub fn like(account: AccountName, message: MessageId) -> DomainResult<Self> {
        Command::like(account, message).map(Self::fresh)
    }

    pub fn unlike(account: AccountName, message: MessageId) -> DomainResult<Self> {
        Command::unlike(account, message).map(Self::fresh)
    }

    pub fn reblog(account: AccountName, message: MessageId) -> DomainResult<Self> {
        Command::reblog(account, message).map(Self::fresh)
    }

    pub fn user_command(
        kind: CommandKind,
        account: Option<AccountName>,
        origin: OriginId,
        user: UserId,
    ) -> DomainResult<Self> {
        Command::user_command(kind, account, origin, user).map(Self::fresh)
    }

    pub fn fetch_timeline(
        timeline: TimelineType,
        account: Option<AccountName>,
        origin: Option<OriginId>,
    ) -> Self {
        Self::fresh(Command::fetch_timeline(timeline, account, origin))
    }

    pub fn search(
        objects: SearchObjects,
        origin: Option<OriginId>,
        query: impl AsRef<str>,
    ) -> DomainResult<Self> {
        Command::search(objects, origin, query).map(Self::fresh)
    }

    pub fn fetch_attachment(message: MessageId, download: DownloadId) -> DomainResult<Self> {
        Command::fetch_attachment(message, download).map(Self::fresh)
    }

    pub fn fetch_avatar(user: UserId) -> DomainResult<Self> {
        Command::fetch_avatar(user).map(Self::fresh)
    }

    pub fn rate_limit_status(account: Option<AccountName>) -> Self {
        Self::fresh(Command::rate_limit_status(account))
    }

    /// Generic no-target command of the given kind.
    pub fn command(kind: CommandKind) -> DomainResult<Self> {
        Command::command(kind).map(Self::fresh)
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn command_data(&self) -> &Command {
        &self.command
    }

    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }

    pub fn priority(&self) -> PriorityTier {
        self.kind().priority()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn outcome(&self) -> &ExecutionOutcome {
        &self.outcome
    }

    pub fn outcome_mut(&mut self) -> &mut ExecutionOutcome {
        &mut self.outcome
    }

    /// Retry decision for this unit: the outcome says a retry is possible and
    /// the kind is worth retrying at all.
    pub fn should_we_retry(&self) -> bool {
        self.outcome.should_we_retry() && self.kind().is_retryable()
    }

    /// Kind + target rendered for display.
    pub fn summary(&self, ctx: &dyn CommandContext) -> String {
        self.command.summary(ctx)
    }
}

impl core::fmt::Display for CommandUnit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} [{}]", self.kind(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use proptest::prelude::*;

    use super::*;
    use crate::context::InMemoryContext;
    use crate::outcome::INITIAL_RETRIES;

    fn hash_of(unit: &CommandUnit) -> u64 {
        let mut hasher = DefaultHasher::new();
        unit.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equality_ignores_id_time_and_outcome() {
        let mut first = CommandUnit::search(SearchObjects::Messages, None, "andstatus").unwrap();
        let other = CommandUnit::search(SearchObjects::Messages, None, "mustard").unwrap();
        assert_ne!(first, other);
        assert_ne!(hash_of(&first), hash_of(&other));

        first.outcome_mut().prepare_for_launch();
        first.outcome_mut().increment_num_io_exceptions();
        first.outcome_mut().after_execution_ended().unwrap();

        let again = CommandUnit::search(SearchObjects::Messages, None, "andstatus").unwrap();
        assert_ne!(first.id(), again.id());
        assert_eq!(first, again);
        assert_eq!(hash_of(&first), hash_of(&again));
    }

    #[test]
    fn failed_search_is_not_retried() {
        let mut unit = CommandUnit::search(SearchObjects::Messages, None, "andstatus").unwrap();
        unit.outcome_mut().prepare_for_launch();
        unit.outcome_mut().increment_num_io_exceptions();
        unit.outcome_mut().after_execution_ended().unwrap();

        assert!(unit.outcome().should_we_retry());
        assert!(!unit.should_we_retry());
    }

    #[test]
    fn soft_failure_of_update_status_is_retried() {
        let mut unit = CommandUnit::update_status(None, MessageId::new(1)).unwrap();
        unit.outcome_mut().prepare_for_launch();
        unit.outcome_mut().increment_num_io_exceptions();
        unit.outcome_mut().after_execution_ended().unwrap();

        assert!(unit.should_we_retry());
        assert_eq!(unit.outcome().retries_left(), INITIAL_RETRIES - 1);
    }

    #[test]
    fn follow_and_unfollow_summaries_show_title_and_handle() {
        let account = AccountName::new("conversation@loadaverage.org").unwrap();
        let ctx = InMemoryContext::new()
            .with_account(account)
            .with_origin(OriginId::new(1), "GNU social")
            .with_user(UserId::new(77), "bob@loadaverage.org");

        for kind in [CommandKind::FollowUser, CommandKind::StopFollowingUser] {
            let unit =
                CommandUnit::user_command(kind, None, OriginId::new(1), UserId::new(77)).unwrap();
            let summary = unit.summary(&ctx);
            let expected = format!("{} bob@loadaverage.org", kind.title());
            assert!(summary.contains(&expected), "{kind}; summary: '{summary}'");
        }
    }

    #[test]
    fn from_command_rejects_invalid_targets() {
        let bad = Command::FetchAttachment {
            message: MessageId::new(1),
            download: DownloadId::UNSET,
        };
        assert!(CommandUnit::from_command(bad).is_err());
        assert!(CommandUnit::from_command(Command::Empty).is_ok());
    }

    #[test]
    fn serde_keeps_bookkeeping_fields() {
        let mut unit = CommandUnit::fetch_attachment(MessageId::new(12), DownloadId::new(23)).unwrap();
        unit.outcome_mut().prepare_for_launch();
        unit.outcome_mut().record_failure("Error in attachment");
        unit.outcome_mut().after_execution_ended().unwrap();

        let json = serde_json::to_string(&unit).unwrap();
        let back: CommandUnit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, unit);
        assert_eq!(back.id(), unit.id());
        assert_eq!(back.created_at(), unit.created_at());
        assert_eq!(back.outcome(), unit.outcome());
    }

    proptest! {
        #[test]
        fn equal_targets_hash_identically(user in 1u64..10_000, origin in 1u64..100, follow in any::<bool>()) {
            let kind = if follow { CommandKind::FollowUser } else { CommandKind::StopFollowingUser };
            let a = CommandUnit::user_command(kind, None, OriginId::new(origin), UserId::new(user)).unwrap();
            let mut b = CommandUnit::user_command(kind, None, OriginId::new(origin), UserId::new(user)).unwrap();
            b.outcome_mut().prepare_for_launch();
            b.outcome_mut().set_hard_error();
            b.outcome_mut().after_execution_ended().unwrap();

            prop_assert_ne!(a.id(), b.id());
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(hash_of(&a), hash_of(&b));
        }
    }
}
