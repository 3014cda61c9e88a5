//! Durable storage for serialized queues.
//!
//! A store holds one opaque blob per queue name. `write` replaces the blob for
//! that name wholesale; there are no partial updates. A missing blob is an
//! empty queue, not an error.

pub mod file;
pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

pub use file::FileDurableStore;
pub use in_memory::InMemoryDurableStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDurableStore;

/// Key-addressable persistence medium, one blob per queue.
///
/// Implementations must make `write` atomic with respect to `read`: a reader
/// sees either the previous blob or the new one, never a mix.
pub trait DurableStore: Send + Sync {
    /// Read the blob stored under `name`, or `None` if nothing was stored.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the blob stored under `name`.
    fn write(&self, name: &str, blob: &[u8]) -> Result<(), StoreError>;

    /// Delete the blob stored under `name`. Deleting a missing blob succeeds.
    fn remove(&self, name: &str) -> Result<(), StoreError>;
}

impl<S: DurableStore + ?Sized> DurableStore for Arc<S> {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).read(name)
    }

    fn write(&self, name: &str, blob: &[u8]) -> Result<(), StoreError> {
        (**self).write(name, blob)
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        (**self).remove(name)
    }
}

/// Durable store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(String),
    #[error("stored queue is corrupt: {0}")]
    Corrupt(String),
    #[error("invalid blob name: {0}")]
    InvalidName(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Blob names become file names and table keys; keep them boring.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}
