//! Observer interface: what producers and the UI get to see.
//!
//! Permanent failures are surfaced as a rendered summary plus the last
//! diagnostic message. Soft failures waiting for a retry are not surfaced.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use statusq_commands::{CommandContext, CommandKind, CommandUnit};
use statusq_core::CommandId;

use crate::store::StoreError;

/// Display record of a permanently failed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub command_id: CommandId,
    pub kind: CommandKind,
    pub summary: String,
    pub message: String,
    pub execution_count: u32,
    pub failed_at: Option<DateTime<Utc>>,
}

impl FailureReport {
    pub fn from_unit(unit: &CommandUnit, ctx: &dyn CommandContext) -> Self {
        let outcome = unit.outcome();
        Self {
            command_id: unit.id(),
            kind: unit.kind(),
            summary: unit.summary(ctx),
            message: outcome.message().to_string(),
            execution_count: outcome.execution_count(),
            failed_at: outcome.last_executed_at(),
        }
    }

    /// One line for display: summary, then the diagnostic if there is one.
    pub fn display_text(&self) -> String {
        if self.message.is_empty() {
            self.summary.clone()
        } else {
            format!("{}: {}", self.summary, self.message)
        }
    }
}

pub trait QueueObserver: Send + Sync {
    /// A command was moved to the permanently-failed queue.
    fn on_permanent_failure(&self, report: &FailureReport);

    /// Persistence failed; automatic saves are suspended until the store recovers.
    fn on_store_failure(&self, _error: &StoreError) {}

    /// A save succeeded after a store failure.
    fn on_store_recovered(&self) {}
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl QueueObserver for TracingObserver {
    fn on_permanent_failure(&self, report: &FailureReport) {
        warn!(
            command_id = %report.command_id,
            kind = %report.kind,
            attempts = report.execution_count,
            "command failed permanently: {}",
            report.display_text()
        );
    }

    fn on_store_failure(&self, error: &StoreError) {
        error!(error = %error, "queue persistence failed; continuing without durability");
    }

    fn on_store_recovered(&self) {
        info!("queue persistence recovered");
    }
}

/// Observer that keeps reports until someone collects them (UI polling, tests).
#[derive(Debug, Default)]
pub struct CollectingObserver {
    failures: Mutex<Vec<FailureReport>>,
    store_errors: Mutex<Vec<StoreError>>,
    recoveries: Mutex<usize>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every failure report collected so far.
    pub fn drain_failures(&self) -> Vec<FailureReport> {
        std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn store_errors(&self) -> Vec<StoreError> {
        self.store_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn recoveries(&self) -> usize {
        *self.recoveries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueueObserver for CollectingObserver {
    fn on_permanent_failure(&self, report: &FailureReport) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
    }

    fn on_store_failure(&self, error: &StoreError) {
        self.store_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error.clone());
    }

    fn on_store_recovered(&self) {
        *self.recoveries.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }
}

impl<O: QueueObserver + ?Sized> QueueObserver for std::sync::Arc<O> {
    fn on_permanent_failure(&self, report: &FailureReport) {
        (**self).on_permanent_failure(report)
    }

    fn on_store_failure(&self, error: &StoreError) {
        (**self).on_store_failure(error)
    }

    fn on_store_recovered(&self) {
        (**self).on_store_recovered()
    }
}
