//! Retry policy, connector reports and cycle results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use statusq_commands::ExecutionOutcome;
use statusq_core::CommandId;

use crate::observer::FailureReport;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    Exponential,
    /// Linear backoff: base * attempt
    #[default]
    Linear,
}

/// Randomization applied to a computed delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    None,
    /// Uniform in `[delay / 2, delay]`.
    #[default]
    UpperHalf,
}

/// How long a soft-failed command waits before it is tried again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(600),
            strategy: BackoffStrategy::Linear,
            jitter: Jitter::UpperHalf,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately. Mostly for tests.
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: Jitter::None,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: Jitter::UpperHalf,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before jitter for a given attempt number (1-indexed).
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
        };
        delay.min(self.max_delay)
    }

    /// Calculate the delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt);
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::UpperHalf => {
                let ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
                if ms < 2 {
                    return ceiling;
                }
                let half = ms / 2;
                Duration::from_millis(half + rand::rng().random_range(0..=ms - half))
            }
        }
    }

    /// Wall-clock time at which attempt `attempt + 1` may run.
    pub fn next_attempt_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for_attempt(attempt))
            .unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Transient failure causes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftCause {
    Io,
    RateLimited,
    Server,
}

/// Permanent failure causes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardCause {
    Auth,
    Parse,
    Rejected,
    Unsupported,
}

/// What a connector reports back for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionReport {
    Success {
        items_added: u64,
    },
    SoftFailure {
        cause: SoftCause,
        diagnostic: String,
    },
    HardFailure {
        cause: HardCause,
        diagnostic: String,
    },
}

impl ExecutionReport {
    pub fn success() -> Self {
        Self::Success { items_added: 0 }
    }

    pub fn success_with_items(items_added: u64) -> Self {
        Self::Success { items_added }
    }

    pub fn soft(cause: SoftCause, diagnostic: impl Into<String>) -> Self {
        Self::SoftFailure {
            cause,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn hard(cause: HardCause, diagnostic: impl Into<String>) -> Self {
        Self::HardFailure {
            cause,
            diagnostic: diagnostic.into(),
        }
    }

    /// Translate the report into signals on a running outcome.
    pub fn record_into(&self, outcome: &mut ExecutionOutcome) {
        match self {
            ExecutionReport::Success { items_added } => outcome.add_items(*items_added),
            ExecutionReport::SoftFailure { cause, diagnostic } => {
                match cause {
                    SoftCause::Io => outcome.increment_num_io_exceptions(),
                    SoftCause::RateLimited | SoftCause::Server => {
                        outcome.set_soft_error_if_not_ok(false)
                    }
                }
                outcome.set_message(diagnostic.as_str());
            }
            ExecutionReport::HardFailure { cause, diagnostic } => {
                match cause {
                    HardCause::Auth => outcome.increment_num_auth_exceptions(),
                    HardCause::Parse => outcome.increment_num_parse_exceptions(),
                    HardCause::Rejected | HardCause::Unsupported => outcome.set_hard_error(),
                }
                outcome.set_message(diagnostic.as_str());
            }
        }
    }
}

/// Result of one executor cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleResult {
    /// Nothing was runnable.
    Idle,
    Succeeded(CommandId),
    /// Soft failure; the unit waits in the retry queue until `at`.
    Retrying { id: CommandId, at: DateTime<Utc> },
    /// Permanent failure; the unit was moved to the error queue.
    Failed(FailureReport),
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    pub in_flight: usize,
}

#[cfg(test)]
mod tests {
    use statusq_commands::ErrorClass;

    use super::*;

    #[test]
    fn linear_backoff_is_capped() {
        let policy = RetryPolicy::default().with_jitter(Jitter::None);
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(15));
        assert_eq!(policy.delay_for_attempt(1000), Duration::from_secs(600));
    }

    #[test]
    fn exponential_backoff_does_not_overflow() {
        let policy = RetryPolicy::exponential(Duration::from_millis(100), Duration::from_secs(10))
            .with_jitter(Jitter::None);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(10));
    }

    #[test]
    fn upper_half_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for attempt in 1..50 {
            let ceiling = policy.ceiling_for_attempt(attempt);
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= ceiling);
            assert!(delay >= ceiling / 2);
        }
    }

    fn settle(report: ExecutionReport) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::new();
        outcome.prepare_for_launch();
        report.record_into(&mut outcome);
        outcome.after_execution_ended().unwrap();
        outcome
    }

    #[test]
    fn reports_map_to_error_classes() {
        assert_eq!(settle(ExecutionReport::success_with_items(3)).items_added(), 3);
        assert_eq!(
            settle(ExecutionReport::success()).error_class(),
            ErrorClass::None
        );

        for cause in [SoftCause::Io, SoftCause::RateLimited, SoftCause::Server] {
            let outcome = settle(ExecutionReport::soft(cause, "try later"));
            assert_eq!(outcome.error_class(), ErrorClass::Soft);
            assert_eq!(outcome.message(), "try later");
        }
        for cause in [
            HardCause::Auth,
            HardCause::Parse,
            HardCause::Rejected,
            HardCause::Unsupported,
        ] {
            assert_eq!(
                settle(ExecutionReport::hard(cause, "no")).error_class(),
                ErrorClass::Hard
            );
        }
    }
}
