//! Infrastructure layer: durable queues, persistence backends, the executor
//! loop and its configuration.

pub mod config;
pub mod observer;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use config::{ConfigError, ExecutorConfig, StoreConfig, StoreKind};
pub use observer::{CollectingObserver, FailureReport, QueueObserver, TracingObserver};
pub use queue::{AddResult, CommandQueue, CommandQueueSet, QueueError, QueueStats, QueueType};
pub use scheduler::{
    CommandExecutor, CommandExecutorHandle, Connector, CycleResult, ExecutionReport,
    ExecutorStats, FnConnector, HardCause, RetryPolicy, SoftCause, Wake, WakeSignal,
};
pub use store::{DurableStore, FileDurableStore, InMemoryDurableStore, StoreError};

#[cfg(feature = "postgres")]
pub use store::PostgresDurableStore;
