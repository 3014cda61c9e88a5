//! The single command executor.
//!
//! One executor serves `Current` in priority order. Each cycle promotes due
//! retries, takes the head unit, runs it through the [`Connector`] and routes
//! it by the settled error class: success is discarded, a soft failure with
//! budget left is parked in `Retry`, everything else goes to `Error`.

use std::any::Any;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use statusq_commands::{CommandContext, CommandUnit, ErrorClass};

use super::signal::{Wake, WakeSignal};
use super::types::{CycleResult, ExecutionReport, ExecutorStats, HardCause, RetryPolicy};
use crate::config::ExecutorConfig;
use crate::queue::CommandQueueSet;

/// Performs the remote side of a command. Implemented by protocol adapters.
pub trait Connector: Send + Sync {
    fn execute(&self, unit: &CommandUnit, ctx: &dyn CommandContext) -> ExecutionReport;
}

impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn execute(&self, unit: &CommandUnit, ctx: &dyn CommandContext) -> ExecutionReport {
        (**self).execute(unit, ctx)
    }
}

/// Connector backed by a closure.
pub struct FnConnector<F>(F);

impl<F> FnConnector<F>
where
    F: Fn(&CommandUnit, &dyn CommandContext) -> ExecutionReport + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Connector for FnConnector<F>
where
    F: Fn(&CommandUnit, &dyn CommandContext) -> ExecutionReport + Send + Sync,
{
    fn execute(&self, unit: &CommandUnit, ctx: &dyn CommandContext) -> ExecutionReport {
        (self.0)(unit, ctx)
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct CommandExecutorHandle {
    wake: Arc<WakeSignal>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl CommandExecutorHandle {
    /// Let the in-flight attempt finish, save every queue and join the thread.
    pub fn stop(mut self) {
        self.wake.stop();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("command executor thread panicked");
            }
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct CommandExecutor {
    queues: Arc<CommandQueueSet>,
    connector: Box<dyn Connector>,
    ctx: Arc<dyn CommandContext>,
    policy: RetryPolicy,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl CommandExecutor {
    pub fn new(
        queues: Arc<CommandQueueSet>,
        connector: impl Connector + 'static,
        ctx: Arc<dyn CommandContext>,
    ) -> Self {
        Self {
            queues,
            connector: Box::new(connector),
            ctx,
            policy: RetryPolicy::default(),
            stats: Arc::new(Mutex::new(ExecutorStats::default())),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn queues(&self) -> &Arc<CommandQueueSet> {
        &self.queues
    }

    pub fn stats(&self) -> ExecutorStats {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, ExecutorStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run at most one command. Never blocks on an empty queue.
    pub fn run_once(&self) -> CycleResult {
        self.queues.promote_due_retries(Utc::now());

        let Some(mut unit) = self.queues.begin_execution() else {
            return CycleResult::Idle;
        };
        let id = unit.id();
        let kind = unit.kind();
        self.lock_stats().in_flight = 1;
        debug!(command_id = %id, kind = %kind, attempt = unit.outcome().execution_count() + 1, "executing command");

        unit.outcome_mut().prepare_for_launch();
        let report = self.execute_guarded(&unit);
        report.record_into(unit.outcome_mut());
        let class = match unit.outcome_mut().after_execution_ended() {
            Ok(class) => class,
            Err(e) => {
                error!(command_id = %id, error = %e, "attempt could not be settled");
                ErrorClass::Hard
            }
        };

        let result = match class {
            ErrorClass::None => {
                debug!(command_id = %id, kind = %kind, items = unit.outcome().items_added(), "command succeeded");
                self.queues.complete(unit);
                CycleResult::Succeeded(id)
            }
            ErrorClass::Soft if unit.should_we_retry() => {
                // Keeps growing across manual retries, unlike the budget.
                let attempt = unit.outcome().execution_count();
                let at = self.policy.next_attempt_at(attempt, Utc::now());
                unit.outcome_mut().set_retry_after(Some(at));
                info!(
                    command_id = %id,
                    kind = %kind,
                    retries_left = unit.outcome().retries_left(),
                    retry_at = %at,
                    error = unit.outcome().message(),
                    "command failed; retry scheduled"
                );
                self.queues.schedule_retry(unit);
                CycleResult::Retrying { id, at }
            }
            _ => {
                let report = self.queues.fail_permanently(unit, self.ctx.as_ref());
                CycleResult::Failed(report)
            }
        };

        let mut stats = self.lock_stats();
        stats.in_flight = 0;
        stats.processed += 1;
        match &result {
            CycleResult::Succeeded(_) => stats.succeeded += 1,
            CycleResult::Retrying { .. } => stats.retried += 1,
            CycleResult::Failed(_) => stats.failed += 1,
            CycleResult::Idle => {}
        }
        result
    }

    fn execute_guarded(&self, unit: &CommandUnit) -> ExecutionReport {
        match catch_unwind(AssertUnwindSafe(|| {
            self.connector.execute(unit, self.ctx.as_ref())
        })) {
            Ok(report) => report,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(command_id = %unit.id(), kind = %unit.kind(), reason = %reason, "connector panicked");
                ExecutionReport::hard(HardCause::Rejected, format!("connector panicked: {reason}"))
            }
        }
    }

    /// Spawn the executor in a background thread.
    ///
    /// The retry policy from `config` replaces the one set on the executor.
    pub fn spawn(mut self, config: ExecutorConfig) -> io::Result<CommandExecutorHandle> {
        self.policy = config.retry_policy.clone();
        let wake = self.queues.wake_signal();
        let stats = Arc::clone(&self.stats);

        let loop_wake = Arc::clone(&wake);
        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || executor_loop(self, config, loop_wake))?;

        Ok(CommandExecutorHandle {
            wake,
            join: Some(join),
            stats,
        })
    }
}

fn executor_loop(executor: CommandExecutor, config: ExecutorConfig, wake: Arc<WakeSignal>) {
    info!(executor = %config.name, "command executor started");

    while !wake.is_stopped() {
        if executor.run_once() != CycleResult::Idle {
            continue;
        }
        let timeout = match executor.queues.next_retry_due() {
            Some(at) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(config.idle_poll_interval),
            None => config.idle_poll_interval,
        };
        if wake.wait(timeout) == Wake::Stopped {
            break;
        }
    }

    match executor.queues.save_all() {
        Ok(saved) => info!(executor = %config.name, saved, "queues saved on shutdown"),
        Err(e) => error!(executor = %config.name, error = %e, "failed to save queues on shutdown"),
    }
    let stats = executor.stats();
    if stats.failed > 0 {
        warn!(executor = %config.name, failed = stats.failed, "commands failed permanently during this run");
    }
    info!(executor = %config.name, processed = stats.processed, "command executor stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
