//! Runtime configuration read from the environment.
//!
//! | variable                   | default          |
//! |----------------------------|------------------|
//! | `STATUSQ_STORE`            | `file`           |
//! | `STATUSQ_QUEUE_DIR`        | `queues`         |
//! | `DATABASE_URL`             | required for `postgres` |
//! | `STATUSQ_IDLE_POLL_MS`     | `1000`           |
//! | `STATUSQ_RETRY_BASE_MS`    | `5000`           |
//! | `STATUSQ_RETRY_MAX_MS`     | `600000`         |
//! | `STATUSQ_STORE_PROBE_SECS` | `30`             |
//! | `STATUSQ_EXECUTOR_NAME`    | `command-executor` |

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::scheduler::RetryPolicy;
use crate::store::{DurableStore, FileDurableStore, InMemoryDurableStore, StoreError};

pub const STORE_VAR: &str = "STATUSQ_STORE";
pub const QUEUE_DIR_VAR: &str = "STATUSQ_QUEUE_DIR";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const IDLE_POLL_VAR: &str = "STATUSQ_IDLE_POLL_MS";
pub const RETRY_BASE_VAR: &str = "STATUSQ_RETRY_BASE_MS";
pub const RETRY_MAX_VAR: &str = "STATUSQ_RETRY_MAX_MS";
pub const STORE_PROBE_VAR: &str = "STATUSQ_STORE_PROBE_SECS";
pub const EXECUTOR_NAME_VAR: &str = "STATUSQ_EXECUTOR_NAME";

/// Upper bound for `STATUSQ_IDLE_POLL_MS`: one hour.
pub const MAX_IDLE_POLL_MS: u64 = 3_600_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("missing required setting {0}")]
    Missing(&'static str),
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Which durable store backs the queues.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    #[default]
    File,
    Postgres,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "file" => Ok(StoreKind::File),
            "postgres" => Ok(StoreKind::Postgres),
            other => Err(format!("expected memory, file or postgres, got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub queue_dir: PathBuf,
    pub database_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::File,
            queue_dir: PathBuf::from("queues"),
            database_url: None,
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            kind: StoreKind::Memory,
            ..Default::default()
        }
    }

    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self {
            kind: StoreKind::File,
            queue_dir: dir.into(),
            database_url: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(kind) = parse_var(&lookup, STORE_VAR)? {
            config.kind = kind;
        }
        if let Some(dir) = lookup(QUEUE_DIR_VAR) {
            config.queue_dir = PathBuf::from(dir);
        }
        config.database_url = lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty());
        if config.kind == StoreKind::Postgres && config.database_url.is_none() {
            return Err(ConfigError::Missing(DATABASE_URL_VAR));
        }
        Ok(config)
    }

    /// Open the configured store.
    pub fn open(&self) -> Result<Arc<dyn DurableStore>, StoreError> {
        match self.kind {
            StoreKind::Memory => {
                info!("using in-memory queue store; queues will not survive a restart");
                Ok(Arc::new(InMemoryDurableStore::new()))
            }
            StoreKind::File => {
                info!(dir = %self.queue_dir.display(), "using file queue store");
                Ok(Arc::new(FileDurableStore::open(self.queue_dir.clone())?))
            }
            StoreKind::Postgres => self.open_postgres(),
        }
    }

    #[cfg(feature = "postgres")]
    fn open_postgres(&self) -> Result<Arc<dyn DurableStore>, StoreError> {
        let url = self
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable(format!("{DATABASE_URL_VAR} is not set")))?;
        info!("using postgres queue store");
        Ok(Arc::new(crate::store::PostgresDurableStore::connect(url)?))
    }

    #[cfg(not(feature = "postgres"))]
    fn open_postgres(&self) -> Result<Arc<dyn DurableStore>, StoreError> {
        Err(StoreError::Unavailable(
            "built without the postgres feature".to_string(),
        ))
    }
}

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Thread name, also used in logs
    pub name: String,
    /// Longest time an idle executor sleeps before looking at the queues again
    pub idle_poll_interval: Duration,
    pub retry_policy: RetryPolicy,
    /// How long automatic persistence stays suspended after a store failure
    pub store_probe_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "command-executor".to_string(),
            idle_poll_interval: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
            store_probe_interval: Duration::from_secs(30),
        }
    }
}

impl ExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_store_probe_interval(mut self, interval: Duration) -> Self {
        self.store_probe_interval = interval;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(name) = lookup(EXECUTOR_NAME_VAR).filter(|n| !n.trim().is_empty()) {
            config.name = name;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, IDLE_POLL_VAR)? {
            if ms == 0 || ms > MAX_IDLE_POLL_MS {
                return Err(ConfigError::Invalid {
                    key: IDLE_POLL_VAR,
                    value: ms.to_string(),
                    reason: format!("must be between 1 and {MAX_IDLE_POLL_MS}"),
                });
            }
            config.idle_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, RETRY_BASE_VAR)? {
            config.retry_policy.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, RETRY_MAX_VAR)? {
            config.retry_policy.max_delay = Duration::from_millis(ms);
        }
        if config.retry_policy.max_delay < config.retry_policy.base_delay {
            return Err(ConfigError::Invalid {
                key: RETRY_MAX_VAR,
                value: config.retry_policy.max_delay.as_millis().to_string(),
                reason: "must not be below the base delay".to_string(),
            });
        }
        if let Some(secs) = parse_var::<u64>(&lookup, STORE_PROBE_VAR)? {
            config.store_probe_interval = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(ExecutorConfig::from_lookup(env(&[])).unwrap(), ExecutorConfig::default());
        assert_eq!(StoreConfig::from_lookup(env(&[])).unwrap(), StoreConfig::default());
    }

    #[test]
    fn executor_settings_are_read() {
        let config = ExecutorConfig::from_lookup(env(&[
            (EXECUTOR_NAME_VAR, "sync-1"),
            (IDLE_POLL_VAR, "250"),
            (RETRY_BASE_VAR, "100"),
            (RETRY_MAX_VAR, "2000"),
            (STORE_PROBE_VAR, "5"),
        ]))
        .unwrap();
        assert_eq!(config.name, "sync-1");
        assert_eq!(config.idle_poll_interval, Duration::from_millis(250));
        assert_eq!(config.retry_policy.base_delay, Duration::from_millis(100));
        assert_eq!(config.retry_policy.max_delay, Duration::from_secs(2));
        assert_eq!(config.store_probe_interval, Duration::from_secs(5));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = ExecutorConfig::from_lookup(env(&[(IDLE_POLL_VAR, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: IDLE_POLL_VAR, .. }));
        let err =
            ExecutorConfig::from_lookup(env(&[(IDLE_POLL_VAR, "18446744073709551615")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: IDLE_POLL_VAR, .. }));
        let max = MAX_IDLE_POLL_MS.to_string();
        let config = ExecutorConfig::from_lookup(env(&[(IDLE_POLL_VAR, max.as_str())])).unwrap();
        assert_eq!(config.idle_poll_interval, Duration::from_secs(3600));

        let err = ExecutorConfig::from_lookup(env(&[(RETRY_BASE_VAR, "9000"), (RETRY_MAX_VAR, "10")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: RETRY_MAX_VAR, .. }));
    }

    #[test]
    fn store_kind_and_postgres_url() {
        let config = StoreConfig::from_lookup(env(&[(STORE_VAR, "Memory")])).unwrap();
        assert_eq!(config.kind, StoreKind::Memory);
        assert!(config.open().is_ok());

        assert_eq!(
            StoreConfig::from_lookup(env(&[(STORE_VAR, "postgres")])).unwrap_err(),
            ConfigError::Missing(DATABASE_URL_VAR)
        );
        assert!(StoreConfig::from_lookup(env(&[(STORE_VAR, "redis")])).is_err());
    }

    #[test]
    fn file_store_opens_in_queue_dir() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("queues");
        let config = StoreConfig::from_lookup(env(&[(
            QUEUE_DIR_VAR,
            queue_dir.to_str().unwrap(),
        )]))
        .unwrap();
        let store = config.open().unwrap();
        store.write("current", b"{}").unwrap();
        assert!(queue_dir.join("current.json").exists());
    }
}
