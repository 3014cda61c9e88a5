//! Execution record of one command: attempts, timing, failure class, budget.
//!
//! ## Lifecycle
//!
//! `Fresh → Running → Settled`, and `Settled → Running` again for each retry.
//!
//! - [`ExecutionOutcome::prepare_for_launch`] starts an attempt and clears the
//!   previous attempt's signals.
//! - While running, the executor records what went wrong (I/O, auth, parse).
//! - [`ExecutionOutcome::after_execution_ended`] settles the attempt and turns
//!   the recorded signals into an [`ErrorClass`].
//!
//! Only the settled fields are persisted. Per-attempt signals and the running
//! flag are volatile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Retry budget of a freshly created command.
pub const INITIAL_RETRIES: u32 = 10;

/// Classification of the last settled attempt.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    #[default]
    None,
    /// Transient: I/O errors, rate limiting, server hiccups.
    Soft,
    /// Permanent: authentication, malformed or rejected request, unsupported.
    Hard,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutcomePhase {
    Fresh,
    Running,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutcomeError {
    #[error("attempt is not running (phase: {0:?})")]
    NotRunning(OutcomePhase),
}

/// Signals recorded during the current attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AttemptSignals {
    io_exceptions: u32,
    auth_exceptions: u32,
    parse_exceptions: u32,
    hard_error: bool,
    soft_error: bool,
}

impl AttemptSignals {
    fn has_hard(&self) -> bool {
        self.hard_error || self.auth_exceptions > 0 || self.parse_exceptions > 0
    }

    fn has_soft(&self) -> bool {
        self.soft_error || self.io_exceptions > 0
    }
}

/// Per-command execution record. Owned by exactly one [`CommandUnit`](crate::CommandUnit).
///
/// Equality compares the persisted fields only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    execution_count: u32,
    last_executed_at: Option<DateTime<Utc>>,
    retries_left: u32,
    error_class: ErrorClass,
    message: String,
    #[serde(default)]
    items_added: u64,
    /// Earliest time a retry-pending command may run again.
    #[serde(default)]
    retry_after: Option<DateTime<Utc>>,
    #[serde(skip)]
    running: bool,
    #[serde(skip)]
    signals: AttemptSignals,
}

impl PartialEq for ExecutionOutcome {
    fn eq(&self, other: &Self) -> bool {
        self.execution_count == other.execution_count
            && self.last_executed_at == other.last_executed_at
            && self.retries_left == other.retries_left
            && self.error_class == other.error_class
            && self.message == other.message
            && self.items_added == other.items_added
            && self.retry_after == other.retry_after
    }
}

impl Eq for ExecutionOutcome {}

impl Default for ExecutionOutcome {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionOutcome {
    pub fn new() -> Self {
        Self {
            execution_count: 0,
            last_executed_at: None,
            retries_left: INITIAL_RETRIES,
            error_class: ErrorClass::None,
            message: String::new(),
            items_added: 0,
            retry_after: None,
            running: false,
            signals: AttemptSignals::default(),
        }
    }

    pub fn phase(&self) -> OutcomePhase {
        if self.running {
            OutcomePhase::Running
        } else if self.execution_count == 0 {
            OutcomePhase::Fresh
        } else {
            OutcomePhase::Settled
        }
    }

    /// Start an attempt. Keeps `execution_count` and `retries_left`.
    pub fn prepare_for_launch(&mut self) {
        self.running = true;
        self.signals = AttemptSignals::default();
        self.message.clear();
        self.retry_after = None;
    }

    /// Settle the running attempt.
    pub fn after_execution_ended(&mut self) -> Result<ErrorClass, OutcomeError> {
        if !self.running {
            return Err(OutcomeError::NotRunning(self.phase()));
        }
        self.running = false;
        self.execution_count = self.execution_count.saturating_add(1);
        self.last_executed_at = Some(Utc::now());

        self.error_class = if self.signals.has_hard() {
            ErrorClass::Hard
        } else if self.signals.has_soft() {
            self.retries_left = self.retries_left.saturating_sub(1);
            ErrorClass::Soft
        } else {
            ErrorClass::None
        };
        Ok(self.error_class)
    }

    /// True iff the last attempt failed softly and budget remains.
    pub fn should_we_retry(&self) -> bool {
        self.error_class == ErrorClass::Soft && self.retries_left > 0
    }

    pub fn increment_num_io_exceptions(&mut self) {
        self.signals.io_exceptions += 1;
    }

    pub fn increment_num_auth_exceptions(&mut self) {
        self.signals.auth_exceptions += 1;
    }

    pub fn increment_num_parse_exceptions(&mut self) {
        self.signals.parse_exceptions += 1;
    }

    pub fn set_hard_error(&mut self) {
        self.signals.hard_error = true;
    }

    pub fn set_soft_error_if_not_ok(&mut self, ok: bool) {
        if !ok {
            self.signals.soft_error = true;
        }
    }

    /// Record an unclassified failure. Unclassified failures are soft.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.signals.soft_error = true;
        self.message = message.into();
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    pub fn add_items(&mut self, count: u64) {
        self.items_added = self.items_added.saturating_add(count);
    }

    pub fn set_retry_after(&mut self, at: Option<DateTime<Utc>>) {
        self.retry_after = at;
    }

    /// Give a permanently failed command a fresh budget (manual retry).
    pub fn reset_for_manual_retry(&mut self) {
        self.retries_left = INITIAL_RETRIES;
        self.error_class = ErrorClass::None;
        self.retry_after = None;
    }

    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    pub fn last_executed_at(&self) -> Option<DateTime<Utc>> {
        self.last_executed_at
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    pub fn error_class(&self) -> ErrorClass {
        self.error_class
    }

    pub fn has_error(&self) -> bool {
        self.error_class != ErrorClass::None
    }

    pub fn has_soft_error(&self) -> bool {
        self.error_class == ErrorClass::Soft
    }

    pub fn has_hard_error(&self) -> bool {
        self.error_class == ErrorClass::Hard
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn items_added(&self) -> u64 {
        self.items_added
    }

    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        self.retry_after
    }

    pub fn num_io_exceptions(&self) -> u32 {
        self.signals.io_exceptions
    }

    pub fn num_auth_exceptions(&self) -> u32 {
        self.signals.auth_exceptions
    }

    pub fn num_parse_exceptions(&self) -> u32 {
        self.signals.parse_exceptions
    }
}
