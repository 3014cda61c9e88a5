//! Named, priority-ordered command queues and their persistence.
//!
//! ## Components
//!
//! - `CommandQueue`: one ordered, de-duplicating collection of units
//! - `CommandQueueSet`: the fixed set of named queues, shared between
//!   producers and the single executor, persisted through a `DurableStore`
//! - `QueueSnapshot`: the blob format written for each queue

pub mod command_queue;
pub mod set;
pub mod snapshot;

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub use command_queue::{AddResult, CommandQueue};
pub use set::{CommandQueueSet, QueueStats, StoreHealth};
pub use snapshot::QueueSnapshot;

/// The logical queues a command moves between.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    /// Pending work, served by the executor.
    Current,
    /// Soft failures waiting for their backoff to expire.
    Retry,
    /// Permanently failed commands, kept for display and manual retry.
    Error,
    /// Scratch queue for tests and tooling.
    Test,
}

impl QueueType {
    pub const ALL: [QueueType; 4] = [
        QueueType::Current,
        QueueType::Retry,
        QueueType::Error,
        QueueType::Test,
    ];

    /// Blob name in the durable store.
    pub fn name(self) -> &'static str {
        match self {
            QueueType::Current => "current",
            QueueType::Retry => "retry",
            QueueType::Error => "error",
            QueueType::Test => "test",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            QueueType::Current => 0,
            QueueType::Retry => 1,
            QueueType::Error => 2,
            QueueType::Test => 3,
        }
    }
}

impl core::fmt::Display for QueueType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueueType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueType::ALL
            .into_iter()
            .find(|q| q.name() == s)
            .ok_or_else(|| QueueError::UnknownQueue(s.to_string()))
    }
}

/// Queue-level error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode queue '{queue}': {reason}")]
    Encode { queue: QueueType, reason: String },
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_parse_back() {
        for queue in QueueType::ALL {
            assert_eq!(queue.name().parse::<QueueType>().unwrap(), queue);
        }
        assert!("pending".parse::<QueueType>().is_err());
    }
}
