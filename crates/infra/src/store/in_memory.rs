//! In-memory durable store for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use super::{DurableStore, StoreError, validate_name};

/// Store that keeps blobs in a map. Survives as long as the value does.
///
/// Writes can be made to fail on demand to exercise degraded persistence.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    refused: RwLock<HashSet<String>>,
    writes: AtomicUsize,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `write` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make writes to `name` alone fail (or succeed again).
    pub fn set_fail_writes_to(&self, name: &str, fail: bool) {
        let mut refused = self.refused.write().unwrap_or_else(PoisonError::into_inner);
        if fail {
            refused.insert(name.to_string());
        } else {
            refused.remove(name);
        }
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

impl DurableStore for InMemoryDurableStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_name(name)?;
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.get(name).cloned())
    }

    fn write(&self, name: &str, blob: &[u8]) -> Result<(), StoreError> {
        validate_name(name)?;
        let refused = self
            .refused
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name);
        if refused || self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(format!("write to '{name}' refused")));
        }
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(name.to_string(), blob.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        blobs.remove(name);
        Ok(())
    }
}
