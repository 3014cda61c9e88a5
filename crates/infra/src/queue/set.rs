//! The named queue set shared by producers and the executor.
//!
//! ## Concurrency
//!
//! Every queue has its own lock. `add`/`take`/`clear` hold it only for the
//! in-memory change. `save` holds the queue's persist lock for its whole
//! duration, takes a snapshot under the queue lock and writes it after
//! releasing that lock, so producers never wait on the store and two saves of
//! one queue cannot reorder (an older snapshot never overwrites a newer one).
//!
//! A unit handed to the executor by [`CommandQueueSet::begin_execution`] is
//! remembered as in flight and included when `Current` is saved. A crash in
//! the middle of an attempt therefore re-runs the attempt after restart
//! instead of losing the unit.
//!
//! Moving a unit between queues writes the target queue before the source.
//! The executor keeps a failed unit in flight until its target queue is
//! written. A crash between the two writes leaves the unit in both queues;
//! [`CommandQueueSet::load_all`] keeps the copy in `Current`.
//!
//! Queues whose automatic save was skipped or failed while the store was
//! degraded are marked dirty and written as soon as the store recovers.
//!
//! Lock order: persist lock, then queue lock, then in-flight lock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use statusq_commands::{CommandContext, CommandUnit};
use statusq_core::CommandId;

use super::command_queue::{AddResult, CommandQueue};
use super::snapshot::QueueSnapshot;
use super::{QueueError, QueueType};
use crate::config::ExecutorConfig;
use crate::observer::{FailureReport, QueueObserver, TracingObserver};
use crate::scheduler::WakeSignal;
use crate::store::{DurableStore, StoreError};

const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct QueueSlot {
    items: Mutex<CommandQueue>,
    persist: Mutex<()>,
    dirty: AtomicBool,
}

/// Whether automatic persistence is currently working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StoreHealth {
    Healthy,
    Degraded {
        since: DateTime<Utc>,
        error: String,
    },
}

#[derive(Debug)]
struct HealthState {
    health: StoreHealth,
    last_attempt: Option<Instant>,
}

/// Per-queue sizes plus store health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub current: usize,
    pub retry: usize,
    pub error: usize,
    pub test: usize,
    pub in_flight: bool,
    pub store: StoreHealth,
}

pub struct CommandQueueSet {
    slots: [QueueSlot; 4],
    in_flight: Mutex<Option<CommandUnit>>,
    store: Arc<dyn DurableStore>,
    observer: Arc<dyn QueueObserver>,
    wake: Arc<WakeSignal>,
    health: Mutex<HealthState>,
    probe_interval: Duration,
}

impl std::fmt::Debug for CommandQueueSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueueSet")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl CommandQueueSet {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            slots: Default::default(),
            in_flight: Mutex::new(None),
            store,
            observer: Arc::new(TracingObserver),
            wake: Arc::new(WakeSignal::new()),
            health: Mutex::new(HealthState {
                health: StoreHealth::Healthy,
                last_attempt: None,
            }),
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// How long automatic persistence stays suspended after a store failure.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Build a set and restore every queue from the store.
    pub fn open(
        store: Arc<dyn DurableStore>,
        observer: Arc<dyn QueueObserver>,
        config: &ExecutorConfig,
        ctx: &dyn CommandContext,
    ) -> Result<Self, QueueError> {
        let set = Self::new(store)
            .with_observer(observer)
            .with_probe_interval(config.store_probe_interval);
        let restored = set.load_all(ctx)?;
        info!(restored, "command queues restored");
        Ok(set)
    }

    fn slot(&self, queue: QueueType) -> &QueueSlot {
        &self.slots[queue.index()]
    }

    /// Signal the executor waits on. Producers' `enqueue` notifies it.
    pub fn wake_signal(&self) -> Arc<WakeSignal> {
        Arc::clone(&self.wake)
    }

    pub fn observer(&self) -> &Arc<dyn QueueObserver> {
        &self.observer
    }

    // ---- raw queue operations (in memory only) ----

    pub fn add(&self, queue: QueueType, unit: CommandUnit) -> AddResult {
        let result = lock(&self.slot(queue).items).add(unit);
        if let AddResult::Duplicate(existing) = result {
            debug!(queue = %queue, existing = %existing, "dropped duplicate command");
        }
        result
    }

    pub fn take(&self, queue: QueueType) -> Option<CommandUnit> {
        lock(&self.slot(queue).items).take()
    }

    pub fn peek(&self, queue: QueueType) -> Option<CommandUnit> {
        lock(&self.slot(queue).items).peek().cloned()
    }

    pub fn len(&self, queue: QueueType) -> usize {
        lock(&self.slot(queue).items).len()
    }

    pub fn is_empty(&self, queue: QueueType) -> bool {
        lock(&self.slot(queue).items).is_empty()
    }

    /// Empty the queue in memory. Call `save` to make it durable.
    pub fn clear(&self, queue: QueueType) {
        lock(&self.slot(queue).items).clear();
    }

    /// Contents of the queue in drain order.
    pub fn units(&self, queue: QueueType) -> Vec<CommandUnit> {
        lock(&self.slot(queue).items).snapshot()
    }

    // ---- producer API ----

    /// Add a unit to `Current`, wake the executor and persist `Current`.
    pub fn enqueue(&self, unit: CommandUnit) -> AddResult {
        let id = unit.id();
        let kind = unit.kind();
        let result = self.add(QueueType::Current, unit);
        if result.is_added() {
            debug!(command_id = %id, kind = %kind, "command enqueued");
            self.persist(QueueType::Current);
            self.wake.notify();
        }
        result
    }

    // ---- executor API ----

    /// Take the head of `Current` and remember it as in flight.
    pub fn begin_execution(&self) -> Option<CommandUnit> {
        let mut items = lock(&self.slot(QueueType::Current).items);
        let unit = items.take()?;
        *lock(&self.in_flight) = Some(unit.clone());
        Some(unit)
    }

    fn end_execution(&self) {
        lock(&self.in_flight).take();
    }

    /// The in-flight unit succeeded and is discarded.
    pub fn complete(&self, unit: CommandUnit) {
        debug!(command_id = %unit.id(), kind = %unit.kind(), "command completed");
        self.end_execution();
        self.persist(QueueType::Current);
    }

    /// The in-flight unit failed softly; park it in `Retry`.
    pub fn schedule_retry(&self, unit: CommandUnit) -> AddResult {
        let id = unit.id();
        let result = self.add(QueueType::Retry, unit);
        self.persist(QueueType::Retry);
        self.end_execution();
        self.persist(QueueType::Current);
        if let AddResult::Duplicate(existing) = result {
            debug!(command_id = %id, existing = %existing, "retry already pending");
        }
        result
    }

    /// The in-flight unit failed permanently; move it to `Error` and tell
    /// the observer.
    pub fn fail_permanently(&self, unit: CommandUnit, ctx: &dyn CommandContext) -> FailureReport {
        let report = FailureReport::from_unit(&unit, ctx);
        self.add(QueueType::Error, unit);
        self.persist(QueueType::Error);
        self.end_execution();
        self.persist(QueueType::Current);
        self.observer.on_permanent_failure(&report);
        report
    }

    /// Move retry-pending units whose backoff has expired back to `Current`.
    pub fn promote_due_retries(&self, now: DateTime<Utc>) -> usize {
        let due = lock(&self.slot(QueueType::Retry).items)
            .take_where(|unit| unit.outcome().retry_after().is_none_or(|at| at <= now));
        if due.is_empty() {
            return 0;
        }
        let mut moved = 0;
        {
            let mut current = lock(&self.slot(QueueType::Current).items);
            for mut unit in due {
                unit.outcome_mut().set_retry_after(None);
                if current.add(unit).is_added() {
                    moved += 1;
                }
            }
        }
        debug!(moved, "retry-pending commands are due");
        self.persist(QueueType::Current);
        self.persist(QueueType::Retry);
        moved
    }

    /// Earliest time a retry-pending unit becomes due.
    pub fn next_retry_due(&self) -> Option<DateTime<Utc>> {
        lock(&self.slot(QueueType::Retry).items)
            .iter()
            .map(|unit| unit.outcome().retry_after().unwrap_or(DateTime::<Utc>::MIN_UTC))
            .min()
    }

    /// Move a permanently failed unit back to `Current` with a fresh budget.
    pub fn retry_failed(&self, id: CommandId) -> Option<AddResult> {
        let mut unit = lock(&self.slot(QueueType::Error).items).remove(id)?;
        unit.outcome_mut().reset_for_manual_retry();
        let result = self.add(QueueType::Current, unit);
        self.persist(QueueType::Current);
        self.persist(QueueType::Error);
        self.wake.notify();
        Some(result)
    }

    /// Display records for every permanently failed unit.
    pub fn failed_reports(&self, ctx: &dyn CommandContext) -> Vec<FailureReport> {
        lock(&self.slot(QueueType::Error).items)
            .iter()
            .map(|unit| FailureReport::from_unit(unit, ctx))
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            current: self.len(QueueType::Current),
            retry: self.len(QueueType::Retry),
            error: self.len(QueueType::Error),
            test: self.len(QueueType::Test),
            in_flight: lock(&self.in_flight).is_some(),
            store: lock(&self.health).health.clone(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(lock(&self.health).health, StoreHealth::Degraded { .. })
    }

    // ---- persistence ----

    /// Write the full contents of `queue` to the store. Returns the number of
    /// units written.
    ///
    /// If this write ends a store outage, every queue left dirty by the outage
    /// is written too.
    pub fn save(&self, queue: QueueType) -> Result<usize, QueueError> {
        let (count, recovered) = self.write_queue(queue)?;
        if recovered {
            self.flush_dirty();
        }
        Ok(count)
    }

    /// Returns the unit count and whether the store just recovered.
    fn write_queue(&self, queue: QueueType) -> Result<(usize, bool), QueueError> {
        let slot = self.slot(queue);
        let _persist = lock(&slot.persist);
        // Cleared before the snapshot so a change that misses it stays dirty.
        slot.dirty.store(false, Ordering::SeqCst);

        let units = {
            let items = lock(&slot.items);
            let mut units = Vec::with_capacity(items.len() + 1);
            if queue == QueueType::Current {
                if let Some(unit) = lock(&self.in_flight).as_ref() {
                    units.push(unit.clone());
                }
            }
            units.extend(items.iter().cloned());
            units
        };
        let count = units.len();
        let blob = match QueueSnapshot::new(queue, units).encode() {
            Ok(blob) => blob,
            Err(e) => {
                slot.dirty.store(true, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        match self.store.write(queue.name(), &blob) {
            Ok(()) => {
                let recovered = self.mark_healthy();
                debug!(queue = %queue, count, "queue saved");
                Ok((count, recovered))
            }
            Err(e) => {
                slot.dirty.store(true, Ordering::SeqCst);
                self.mark_degraded(&e);
                Err(e.into())
            }
        }
    }

    fn flush_dirty(&self) {
        for queue in QueueType::ALL {
            if !self.slot(queue).dirty.load(Ordering::SeqCst) {
                continue;
            }
            match self.write_queue(queue) {
                Ok((count, _)) => info!(queue = %queue, count, "queue saved after store recovery"),
                Err(e) => {
                    warn!(queue = %queue, error = %e, "queue save after store recovery failed");
                    return;
                }
            }
        }
    }

    /// Replace the in-memory contents of `queue` with the stored blob.
    ///
    /// Units whose account, origin or user no longer resolves in `ctx` are
    /// dropped. Returns the number of units restored.
    pub fn load(&self, queue: QueueType, ctx: &dyn CommandContext) -> Result<usize, QueueError> {
        let slot = self.slot(queue);
        let _persist = lock(&slot.persist);

        let units = match self.store.read(queue.name())? {
            Some(bytes) => QueueSnapshot::decode(&bytes)?.units,
            None => Vec::new(),
        };

        let mut restored = CommandQueue::new();
        let mut dropped = 0usize;
        for unit in units {
            if let Some(missing) = unit.command_data().unresolved_reference(ctx) {
                debug!(queue = %queue, command_id = %unit.id(), missing = %missing, "dropping command with dangling reference");
                dropped += 1;
                continue;
            }
            if !restored.add(unit).is_added() {
                dropped += 1;
            }
        }
        let count = restored.len();
        *lock(&slot.items) = restored;

        if dropped > 0 {
            info!(queue = %queue, restored = count, dropped, "queue loaded");
        } else {
            debug!(queue = %queue, restored = count, "queue loaded");
        }
        if queue == QueueType::Current && count > 0 {
            self.wake.notify();
        }
        Ok(count)
    }

    /// Save every queue. Tries all of them and reports the first failure.
    pub fn save_all(&self) -> Result<usize, QueueError> {
        let mut total = 0;
        let mut first_error = None;
        for queue in QueueType::ALL {
            match self.save(queue) {
                Ok(count) => total += count,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Load every queue, then drop `Retry` and `Error` units that are also
    /// in `Current`. Returns the number of units kept.
    pub fn load_all(&self, ctx: &dyn CommandContext) -> Result<usize, QueueError> {
        let mut total = 0;
        for queue in QueueType::ALL {
            total += self.load(queue, ctx)?;
        }
        Ok(total - self.drop_units_pending_in_current())
    }

    /// A crash in the middle of a move leaves one unit in two queues.
    fn drop_units_pending_in_current(&self) -> usize {
        let pending: HashSet<CommandId> = lock(&self.slot(QueueType::Current).items)
            .iter()
            .map(CommandUnit::id)
            .collect();
        if pending.is_empty() {
            return 0;
        }
        let mut dropped = 0;
        for queue in [QueueType::Retry, QueueType::Error] {
            let taken =
                lock(&self.slot(queue).items).take_where(|unit| pending.contains(&unit.id()));
            if !taken.is_empty() {
                info!(queue = %queue, dropped = taken.len(), "dropped commands already pending in current");
                dropped += taken.len();
            }
        }
        dropped
    }

    /// Automatic persistence after a mutation. Skipped while the store is
    /// degraded, except for one probe per `probe_interval`.
    fn persist(&self, queue: QueueType) {
        if !self.should_attempt_write() {
            self.slot(queue).dirty.store(true, Ordering::SeqCst);
            debug!(queue = %queue, "store degraded; skipping save");
            return;
        }
        if let Err(e) = self.save(queue) {
            debug!(queue = %queue, error = %e, "automatic save failed");
        }
    }

    fn should_attempt_write(&self) -> bool {
        let state = lock(&self.health);
        match (&state.health, state.last_attempt) {
            (StoreHealth::Healthy, _) => true,
            (StoreHealth::Degraded { .. }, Some(last)) => last.elapsed() >= self.probe_interval,
            (StoreHealth::Degraded { .. }, None) => true,
        }
    }

    /// Returns whether the store was degraded until now.
    fn mark_healthy(&self) -> bool {
        let recovered = {
            let mut state = lock(&self.health);
            state.last_attempt = Some(Instant::now());
            let was_degraded = matches!(state.health, StoreHealth::Degraded { .. });
            state.health = StoreHealth::Healthy;
            was_degraded
        };
        if recovered {
            info!("queue store recovered");
            self.observer.on_store_recovered();
        }
        recovered
    }

    fn mark_degraded(&self, error: &StoreError) {
        let newly_degraded = {
            let mut state = lock(&self.health);
            state.last_attempt = Some(Instant::now());
            match state.health {
                StoreHealth::Healthy => {
                    state.health = StoreHealth::Degraded {
                        since: Utc::now(),
                        error: error.to_string(),
                    };
                    true
                }
                StoreHealth::Degraded { .. } => false,
            }
        };
        if newly_degraded {
            warn!(error = %error, "queue store failed; automatic persistence suspended");
            self.observer.on_store_failure(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use statusq_commands::{
        CommandKind, ErrorClass, INITIAL_RETRIES, InMemoryContext, OutcomePhase, SearchObjects,
    };
    use statusq_core::{AccountName, DownloadId, MessageId, OriginId, UserId};

    use std::sync::{OnceLock, Weak};

    use super::*;
    use crate::observer::CollectingObserver;
    use crate::store::InMemoryDurableStore;

    /// Store that saves `Current` from inside the first write of `target`,
    /// as a producer on another thread could, and records which units a
    /// crash at that moment would leave in the two blobs.
    struct InterleavedStore {
        inner: InMemoryDurableStore,
        target: &'static str,
        queues: OnceLock<Weak<CommandQueueSet>>,
        crash_image: Mutex<Option<Vec<CommandId>>>,
    }

    impl InterleavedStore {
        fn new(target: &'static str) -> Self {
            Self {
                inner: InMemoryDurableStore::new(),
                target,
                queues: OnceLock::new(),
                crash_image: Mutex::new(None),
            }
        }

        fn stored_ids(&self, name: &str) -> Vec<CommandId> {
            self.inner
                .read(name)
                .unwrap()
                .map(|bytes| {
                    QueueSnapshot::decode(&bytes)
                        .unwrap()
                        .units
                        .iter()
                        .map(|u| u.id())
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    impl DurableStore for InterleavedStore {
        fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.read(name)
        }

        fn write(&self, name: &str, blob: &[u8]) -> Result<(), StoreError> {
            if name == self.target {
                if let Some(queues) = self.queues.get().and_then(Weak::upgrade) {
                    let mut image = lock(&self.crash_image);
                    if image.is_none() {
                        queues.save(QueueType::Current).unwrap();
                        let mut ids = self.stored_ids("current");
                        ids.extend(self.stored_ids(self.target));
                        *image = Some(ids);
                    }
                }
            }
            self.inner.write(name, blob)
        }

        fn remove(&self, name: &str) -> Result<(), StoreError> {
            self.inner.remove(name)
        }
    }

    fn account() -> AccountName {
        AccountName::new("conversation@loadaverage.org").unwrap()
    }

    fn context() -> InMemoryContext {
        InMemoryContext::new()
            .with_account(account())
            .with_origin(OriginId::new(1), "GNU social")
            .with_user(UserId::new(7), "bob@loadaverage.org")
    }

    fn set_with(store: Arc<InMemoryDurableStore>) -> CommandQueueSet {
        CommandQueueSet::new(store)
    }

    fn failed_once(mut unit: CommandUnit) -> CommandUnit {
        unit.outcome_mut().prepare_for_launch();
        unit.outcome_mut().increment_num_io_exceptions();
        let message = format!("Error in {}", unit.id());
        unit.outcome_mut().set_message(message);
        unit.outcome_mut().after_execution_ended().unwrap();
        unit
    }

    fn assert_round_trip(unit: CommandUnit) {
        let store = Arc::new(InMemoryDurableStore::new());
        let queues = set_with(store);
        let ctx = context();
        let unit = failed_once(unit);

        queues.add(QueueType::Test, unit.clone());
        assert_eq!(queues.save(QueueType::Test).unwrap(), 1);
        queues.clear(QueueType::Test);
        assert_eq!(queues.load(QueueType::Test, &ctx).unwrap(), 1);

        let loaded = queues.take(QueueType::Test).unwrap();
        assert_eq!(loaded, unit);
        assert_eq!(loaded.id(), unit.id());
        assert_eq!(loaded.created_at(), unit.created_at());

        let (a, b) = (loaded.outcome(), unit.outcome());
        assert_eq!(a.last_executed_at(), b.last_executed_at());
        assert_eq!(a.execution_count(), 1);
        assert_eq!(a.retries_left(), INITIAL_RETRIES - 1);
        assert_eq!(a.has_error(), b.has_error());
        assert_eq!(a.has_soft_error(), b.has_soft_error());
        assert_eq!(a.message(), b.message());
        assert_eq!(a.phase(), OutcomePhase::Settled);
    }

    #[test]
    fn save_then_load_restores_update_status() {
        assert_round_trip(CommandUnit::update_status(Some(account()), MessageId::new(1)).unwrap());
    }

    #[test]
    fn save_then_load_restores_fetch_attachment() {
        assert_round_trip(
            CommandUnit::fetch_attachment(MessageId::new(31), DownloadId::new(23)).unwrap(),
        );
    }

    #[test]
    fn load_of_missing_blob_is_empty() {
        let queues = set_with(Arc::new(InMemoryDurableStore::new()));
        queues.add(QueueType::Retry, CommandUnit::command(CommandKind::Empty).unwrap());
        assert_eq!(queues.load(QueueType::Retry, &context()).unwrap(), 0);
        assert!(queues.is_empty(QueueType::Retry));
    }

    #[test]
    fn load_drops_units_with_dangling_references() {
        let store = Arc::new(InMemoryDurableStore::new());
        let queues = set_with(store.clone());
        queues.add(
            QueueType::Test,
            CommandUnit::update_status(Some(account()), MessageId::new(1)).unwrap(),
        );
        queues.add(
            QueueType::Test,
            CommandUnit::user_command(CommandKind::FollowUser, None, OriginId::new(1), UserId::new(7))
                .unwrap(),
        );
        queues.add(
            QueueType::Test,
            CommandUnit::search(SearchObjects::Messages, Some(OriginId::new(1)), "q").unwrap(),
        );
        assert_eq!(queues.save(QueueType::Test).unwrap(), 3);

        let mut ctx = context();
        ctx.remove_account(&account());
        let reopened = set_with(store);
        assert_eq!(reopened.load(QueueType::Test, &ctx).unwrap(), 2);
        assert!(
            reopened
                .units(QueueType::Test)
                .iter()
                .all(|u| u.kind() != CommandKind::UpdateStatus)
        );
    }

    #[test]
    fn load_keeps_drain_order() {
        let store = Arc::new(InMemoryDurableStore::new());
        let queues = set_with(store.clone());
        let first = CommandUnit::command(CommandKind::FetchTimeline).unwrap();
        let second = CommandUnit::search(SearchObjects::Users, None, "alice").unwrap();
        let (first_id, second_id) = (first.id(), second.id());
        queues.add(QueueType::Current, first);
        queues.add(QueueType::Current, second);
        queues.save(QueueType::Current).unwrap();

        let reopened = set_with(store);
        reopened.load(QueueType::Current, &context()).unwrap();
        assert_eq!(reopened.take(QueueType::Current).unwrap().id(), first_id);
        assert_eq!(reopened.take(QueueType::Current).unwrap().id(), second_id);
    }

    #[test]
    fn clear_is_not_durable_until_saved() {
        let store = Arc::new(InMemoryDurableStore::new());
        let queues = set_with(store.clone());
        queues.add(QueueType::Error, CommandUnit::command(CommandKind::Empty).unwrap());
        queues.save(QueueType::Error).unwrap();
        queues.clear(QueueType::Error);

        let reopened = set_with(store.clone());
        assert_eq!(reopened.load(QueueType::Error, &context()).unwrap(), 1);

        queues.save(QueueType::Error).unwrap();
        let reopened = set_with(store);
        assert_eq!(reopened.load(QueueType::Error, &context()).unwrap(), 0);
    }

    #[test]
    fn enqueue_persists_and_deduplicates() {
        let store = Arc::new(InMemoryDurableStore::new());
        let queues = set_with(store.clone());
        let unit = CommandUnit::fetch_timeline(Default::default(), Some(account()), None);
        let id = unit.id();

        assert_eq!(queues.enqueue(unit), AddResult::Added);
        assert_eq!(
            queues.enqueue(CommandUnit::fetch_timeline(Default::default(), Some(account()), None)),
            AddResult::Duplicate(id)
        );
        assert_eq!(queues.len(QueueType::Current), 1);
        assert_eq!(store.write_count(), 1);
        assert!(store.contains("current"));
    }

    #[test]
    fn in_flight_unit_is_saved_with_current() {
        let store = Arc::new(InMemoryDurableStore::new());
        let queues = set_with(store.clone());
        queues.enqueue(CommandUnit::update_status(None, MessageId::new(9)).unwrap());

        let unit = queues.begin_execution().unwrap();
        assert!(queues.stats().in_flight);
        assert_eq!(queues.save(QueueType::Current).unwrap(), 1);

        // Crash here: a fresh process sees the unit again.
        let reopened = set_with(store.clone());
        assert_eq!(reopened.load(QueueType::Current, &context()).unwrap(), 1);

        queues.complete(unit);
        assert!(!queues.stats().in_flight);
        let reopened = set_with(store);
        assert_eq!(reopened.load(QueueType::Current, &context()).unwrap(), 0);
    }

    #[test]
    fn due_retries_are_promoted() {
        let queues = set_with(Arc::new(InMemoryDurableStore::new()));
        let now = Utc::now();
        let mut due = failed_once(CommandUnit::update_status(None, MessageId::new(1)).unwrap());
        due.outcome_mut().set_retry_after(Some(now - chrono::Duration::seconds(1)));
        let mut later = failed_once(CommandUnit::update_status(None, MessageId::new(2)).unwrap());
        let later_at = now + chrono::Duration::seconds(60);
        later.outcome_mut().set_retry_after(Some(later_at));

        queues.add(QueueType::Retry, due);
        queues.add(QueueType::Retry, later);

        assert_eq!(queues.promote_due_retries(now), 1);
        assert_eq!(queues.len(QueueType::Current), 1);
        assert_eq!(queues.next_retry_due(), Some(later_at));

        let promoted = queues.take(QueueType::Current).unwrap();
        assert_eq!(promoted.outcome().retry_after(), None);
        assert_eq!(promoted.outcome().error_class(), ErrorClass::Soft);
    }

    #[test]
    fn permanent_failure_reaches_observer_and_can_be_retried() {
        let observer = Arc::new(CollectingObserver::new());
        let queues = set_with(Arc::new(InMemoryDurableStore::new())).with_observer(observer.clone());
        let ctx = context();
        queues.enqueue(
            CommandUnit::user_command(CommandKind::StopFollowingUser, None, OriginId::new(1), UserId::new(7))
                .unwrap(),
        );

        let mut unit = queues.begin_execution().unwrap();
        let id = unit.id();
        unit.outcome_mut().prepare_for_launch();
        unit.outcome_mut().increment_num_auth_exceptions();
        unit.outcome_mut().set_message("403 Forbidden");
        unit.outcome_mut().after_execution_ended().unwrap();
        queues.fail_permanently(unit, &ctx);

        let reports = observer.drain_failures();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].display_text(),
            "Stop following bob@loadaverage.org on GNU social: 403 Forbidden"
        );
        assert_eq!(queues.failed_reports(&ctx).len(), 1);

        assert_eq!(queues.retry_failed(id), Some(AddResult::Added));
        assert!(queues.is_empty(QueueType::Error));
        let retried = queues.take(QueueType::Current).unwrap();
        assert_eq!(retried.outcome().retries_left(), INITIAL_RETRIES);
        assert!(!retried.outcome().has_error());
    }

    #[test]
    fn store_failure_degrades_then_recovers() {
        let store = Arc::new(InMemoryDurableStore::new());
        let observer = Arc::new(CollectingObserver::new());
        let queues = set_with(store.clone())
            .with_observer(observer.clone())
            .with_probe_interval(Duration::from_secs(3600));

        store.set_fail_writes(true);
        queues.enqueue(CommandUnit::command(CommandKind::Empty).unwrap());
        assert!(queues.is_degraded());
        assert_eq!(observer.store_errors().len(), 1);

        // Automatic saves are suspended; in-memory work continues.
        queues.enqueue(CommandUnit::command(CommandKind::FetchTimeline).unwrap());
        assert_eq!(queues.len(QueueType::Current), 2);
        assert_eq!(observer.store_errors().len(), 1);

        store.set_fail_writes(false);
        assert_eq!(queues.save(QueueType::Current).unwrap(), 2);
        assert!(!queues.is_degraded());
        assert_eq!(observer.recoveries(), 1);
    }

    #[test]
    fn queues_changed_during_outage_are_written_on_recovery() {
        let store = Arc::new(InMemoryDurableStore::new());
        let queues = set_with(store.clone()).with_probe_interval(Duration::ZERO);
        queues.enqueue(CommandUnit::update_status(None, MessageId::new(5)).unwrap());
        let unit = failed_once(queues.begin_execution().unwrap());
        let id = unit.id();

        store.set_fail_writes(true);
        queues.schedule_retry(unit);
        assert!(queues.is_degraded());

        // Recovery comes from a save of a different queue.
        store.set_fail_writes(false);
        queues.enqueue(CommandUnit::command(CommandKind::FetchTimeline).unwrap());
        assert!(!queues.is_degraded());

        let reopened = set_with(store);
        assert_eq!(reopened.load_all(&context()).unwrap(), 2);
        let retry: Vec<_> = reopened.units(QueueType::Retry).iter().map(|u| u.id()).collect();
        assert_eq!(retry, vec![id]);
        assert_eq!(
            reopened.peek(QueueType::Current).map(|u| u.kind()),
            Some(CommandKind::FetchTimeline)
        );
    }

    #[test]
    fn skipped_saves_are_flushed_by_explicit_save() {
        let store = Arc::new(InMemoryDurableStore::new());
        let queues = set_with(store.clone()).with_probe_interval(Duration::from_secs(3600));
        store.set_fail_writes(true);
        queues.enqueue(CommandUnit::command(CommandKind::Empty).unwrap());
        queues.add(QueueType::Error, CommandUnit::command(CommandKind::GetStatus).unwrap());
        assert!(queues.retry_failed(queues.units(QueueType::Error)[0].id()).is_some());
        assert!(!store.contains("current"));

        store.set_fail_writes(false);
        queues.save(QueueType::Test).unwrap();
        let reopened = set_with(store);
        assert_eq!(reopened.load(QueueType::Current, &context()).unwrap(), 2);
        assert_eq!(reopened.load(QueueType::Error, &context()).unwrap(), 0);
    }

    #[test]
    fn failed_unit_stays_durable_while_it_moves() {
        let ctx = context();
        for target in ["retry", "error"] {
            let store = Arc::new(InterleavedStore::new(target));
            let queues = Arc::new(CommandQueueSet::new(store.clone()));
            store.queues.set(Arc::downgrade(&queues)).unwrap();
            queues.enqueue(CommandUnit::update_status(None, MessageId::new(8)).unwrap());

            let unit = failed_once(queues.begin_execution().unwrap());
            let id = unit.id();
            if target == "retry" {
                queues.schedule_retry(unit);
            } else {
                queues.fail_permanently(unit, &ctx);
            }

            let image = lock(&store.crash_image).clone().unwrap();
            assert!(image.contains(&id), "unit lost while moving to {target}");
            assert!(!queues.stats().in_flight);
        }
    }

    #[test]
    fn load_all_keeps_one_copy_after_interrupted_move() {
        let store = Arc::new(InMemoryDurableStore::new());
        let queues = set_with(store.clone()).with_probe_interval(Duration::ZERO);
        let ctx = context();
        queues.enqueue(CommandUnit::update_status(None, MessageId::new(6)).unwrap());
        queues.enqueue(
            CommandUnit::user_command(CommandKind::FollowUser, None, OriginId::new(1), UserId::new(7))
                .unwrap(),
        );

        // Every write of `Current` is lost, as if the process died right
        // after writing the target queue.
        store.set_fail_writes_to("current", true);
        let retried = failed_once(queues.begin_execution().unwrap());
        queues.schedule_retry(retried);
        let failed = failed_once(queues.begin_execution().unwrap());
        queues.fail_permanently(failed, &ctx);
        assert!(store.contains("retry"));
        assert!(store.contains("error"));

        let reopened = set_with(store);
        assert_eq!(reopened.load_all(&ctx).unwrap(), 2);
        assert_eq!(reopened.len(QueueType::Current), 2);
        assert!(reopened.is_empty(QueueType::Retry));
        assert!(reopened.is_empty(QueueType::Error));
    }

    #[test]
    fn open_restores_saved_queues() {
        let store = Arc::new(InMemoryDurableStore::new());
        let queues = set_with(store.clone());
        queues.enqueue(CommandUnit::command(CommandKind::FetchTimeline).unwrap());
        queues.add(QueueType::Error, CommandUnit::command(CommandKind::Empty).unwrap());
        queues.save_all().unwrap();

        let config = ExecutorConfig::default().with_store_probe_interval(Duration::from_secs(1));
        let reopened =
            CommandQueueSet::open(store, Arc::new(CollectingObserver::new()), &config, &context())
                .unwrap();
        assert_eq!(reopened.len(QueueType::Current), 1);
        assert_eq!(reopened.len(QueueType::Error), 1);
        assert_eq!(reopened.probe_interval, Duration::from_secs(1));
    }

    #[test]
    fn save_all_reports_total() {
        let queues = set_with(Arc::new(InMemoryDurableStore::new()));
        queues.add(QueueType::Current, CommandUnit::command(CommandKind::Empty).unwrap());
        queues.add(QueueType::Error, CommandUnit::command(CommandKind::Empty).unwrap());
        assert_eq!(queues.save_all().unwrap(), 2);
        assert_eq!(queues.load_all(&context()).unwrap(), 2);
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queues = Arc::new(set_with(Arc::new(InMemoryDurableStore::new())));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let queues = Arc::clone(&queues);
                std::thread::spawn(move || {
                    for i in 1..=25u64 {
                        let msg = MessageId::new(t * 100 + i);
                        queues.add(QueueType::Current, CommandUnit::update_status(None, msg).unwrap());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queues.len(QueueType::Current), 100);
    }
}
