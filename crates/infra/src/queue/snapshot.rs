//! Blob format of a persisted queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use statusq_commands::CommandUnit;

use super::{QueueError, QueueType};
use crate::store::StoreError;

pub const FORMAT_VERSION: u32 = 1;

/// Full contents of one queue, in drain order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub format_version: u32,
    pub queue: QueueType,
    pub saved_at: DateTime<Utc>,
    pub units: Vec<CommandUnit>,
}

impl QueueSnapshot {
    pub fn new(queue: QueueType, units: Vec<CommandUnit>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            queue,
            saved_at: Utc::now(),
            units,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec_pretty(self).map_err(|e| QueueError::Encode {
            queue: self.queue,
            reason: e.to_string(),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let snapshot: QueueSnapshot = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::Corrupt(format!("queue blob: {e}")))?;
        if snapshot.format_version != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported queue format version {}",
                snapshot.format_version
            )));
        }
        Ok(snapshot)
    }
}
