//! A single priority-ordered queue of command units.

use std::collections::{BTreeMap, HashMap};

use statusq_commands::{Command, CommandUnit, PriorityTier};
use statusq_core::CommandId;

/// Ordering key: priority tier first, then insertion order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    tier: PriorityTier,
    seq: u64,
}

/// Result of [`CommandQueue::add`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddResult {
    Added,
    /// An equal unit was already queued. It stays; the new one was dropped.
    Duplicate(CommandId),
}

impl AddResult {
    pub fn is_added(self) -> bool {
        matches!(self, AddResult::Added)
    }
}

/// Ordered multiset of units with de-duplication by command equality.
///
/// Not synchronized; [`CommandQueueSet`](super::CommandQueueSet) wraps each
/// queue in its own lock.
#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: BTreeMap<QueueKey, CommandUnit>,
    index: HashMap<Command, QueueKey>,
    next_seq: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a unit behind every queued unit of the same tier.
    ///
    /// If an equal unit (same kind and target) is already queued, the queued
    /// one wins and `unit` is dropped together with its outcome.
    pub fn add(&mut self, unit: CommandUnit) -> AddResult {
        if let Some(key) = self.index.get(unit.command_data()) {
            if let Some(existing) = self.entries.get(key) {
                return AddResult::Duplicate(existing.id());
            }
        }
        let key = QueueKey {
            tier: unit.priority(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.index.insert(unit.command_data().clone(), key);
        self.entries.insert(key, unit);
        AddResult::Added
    }

    /// Remove and return the highest-priority unit.
    pub fn take(&mut self) -> Option<CommandUnit> {
        let (_, unit) = self.entries.pop_first()?;
        self.index.remove(unit.command_data());
        Some(unit)
    }

    pub fn peek(&self) -> Option<&CommandUnit> {
        self.entries.values().next()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, unit: &CommandUnit) -> bool {
        self.index.contains_key(unit.command_data())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Remove the unit with the given id.
    pub fn remove(&mut self, id: CommandId) -> Option<CommandUnit> {
        let key = self
            .entries
            .iter()
            .find(|(_, unit)| unit.id() == id)
            .map(|(key, _)| *key)?;
        let unit = self.entries.remove(&key)?;
        self.index.remove(unit.command_data());
        Some(unit)
    }

    /// Remove every unit matching `pred`, in queue order.
    pub fn take_where(&mut self, mut pred: impl FnMut(&CommandUnit) -> bool) -> Vec<CommandUnit> {
        let keys: Vec<QueueKey> = self
            .entries
            .iter()
            .filter(|(_, unit)| pred(unit))
            .map(|(key, _)| *key)
            .collect();
        let mut taken = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(unit) = self.entries.remove(&key) {
                self.index.remove(unit.command_data());
                taken.push(unit);
            }
        }
        taken
    }

    /// Units in the order `take` would return them.
    pub fn iter(&self) -> impl Iterator<Item = &CommandUnit> {
        self.entries.values()
    }

    /// Clone of the contents in queue order.
    pub fn snapshot(&self) -> Vec<CommandUnit> {
        self.entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use statusq_commands::{CommandKind, SearchObjects, TimelineType};
    use statusq_core::{MessageId, OriginId};

    use super::*;

    fn drain(queue: &mut CommandQueue) -> Vec<CommandKind> {
        std::iter::from_fn(|| queue.take()).map(|u| u.kind()).collect()
    }

    #[test]
    fn drains_by_tier_then_insertion_order() {
        let mut queue = CommandQueue::new();
        let first_update = CommandUnit::update_status(None, MessageId::new(2)).unwrap();
        let second_update = CommandUnit::update_status(None, MessageId::new(3)).unwrap();
        let first_id = first_update.id();
        let second_id = second_update.id();

        queue.add(first_update);
        queue.add(CommandUnit::command(CommandKind::FetchTimeline).unwrap());
        queue.add(second_update);
        queue.add(CommandUnit::command(CommandKind::GetStatus).unwrap());
        queue.add(
            CommandUnit::search(SearchObjects::Messages, Some(OriginId::new(1)), "q1").unwrap(),
        );

        assert_eq!(queue.take().map(|u| u.id()), Some(first_id));
        assert_eq!(queue.take().map(|u| u.id()), Some(second_id));
        assert_eq!(
            drain(&mut queue),
            vec![
                CommandKind::GetStatus,
                CommandKind::FetchTimeline,
                CommandKind::Search
            ]
        );
        assert!(queue.take().is_none());
    }

    #[test]
    fn timeline_fetches_keep_insertion_order_behind_get_status() {
        let mut queue = CommandQueue::new();
        let home = CommandUnit::fetch_timeline(TimelineType::Home, None, None);
        let mentions = CommandUnit::fetch_timeline(TimelineType::Mentions, None, None);
        let (home_id, mentions_id) = (home.id(), mentions.id());

        queue.add(CommandUnit::update_status(None, MessageId::new(2)).unwrap());
        queue.add(CommandUnit::update_status(None, MessageId::new(3)).unwrap());
        queue.add(home);
        queue.add(CommandUnit::command(CommandKind::GetStatus).unwrap());
        queue.add(mentions);

        let order: Vec<_> = std::iter::from_fn(|| queue.take()).collect();
        let kinds: Vec<_> = order.iter().map(|u| u.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                CommandKind::UpdateStatus,
                CommandKind::UpdateStatus,
                CommandKind::GetStatus,
                CommandKind::FetchTimeline,
                CommandKind::FetchTimeline,
            ]
        );
        assert_eq!(order[3].id(), home_id);
        assert_eq!(order[4].id(), mentions_id);
    }

    #[test]
    fn existing_unit_wins_over_equal_newcomer() {
        let mut queue = CommandQueue::new();
        let mut existing = CommandUnit::update_status(None, MessageId::new(1)).unwrap();
        existing.outcome_mut().set_message("queued first");
        let existing_id = existing.id();
        let newcomer = CommandUnit::update_status(None, MessageId::new(1)).unwrap();

        assert_eq!(queue.add(existing), AddResult::Added);
        assert_eq!(queue.add(newcomer), AddResult::Duplicate(existing_id));
        assert_eq!(queue.len(), 1);

        let survivor = queue.take().unwrap();
        assert_eq!(survivor.id(), existing_id);
        assert_eq!(survivor.outcome().message(), "queued first");
    }

    #[test]
    fn equal_unit_can_be_queued_again_after_take() {
        let mut queue = CommandQueue::new();
        queue.add(CommandUnit::command(CommandKind::Empty).unwrap());
        queue.take();
        assert!(queue.add(CommandUnit::command(CommandKind::Empty).unwrap()).is_added());
    }

    #[test]
    fn remove_and_take_where_keep_index_in_sync() {
        let mut queue = CommandQueue::new();
        let timeline = CommandUnit::command(CommandKind::FetchTimeline).unwrap();
        let timeline_id = timeline.id();
        queue.add(timeline);
        queue.add(CommandUnit::command(CommandKind::Empty).unwrap());
        queue.add(CommandUnit::command(CommandKind::RateLimitStatus).unwrap());

        assert!(queue.remove(timeline_id).is_some());
        assert!(queue.remove(timeline_id).is_none());

        let taken = queue.take_where(|u| u.kind() == CommandKind::Empty);
        assert_eq!(taken.len(), 1);
        assert_eq!(queue.len(), 1);
        assert!(queue.add(CommandUnit::command(CommandKind::Empty).unwrap()).is_added());
        assert!(queue.add(CommandUnit::command(CommandKind::FetchTimeline).unwrap()).is_added());
    }
}
