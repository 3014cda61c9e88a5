//! Background execution of queued commands.
//!
//! ## Components
//!
//! - `CommandExecutor`: the single consumer of `Current`; routes every
//!   attempt to completion, retry or permanent failure
//! - `Connector`: the protocol side that actually talks to a server
//! - `RetryPolicy`: backoff between attempts of a soft-failed command
//! - `WakeSignal`: lets producers wake an idle executor and lets the handle
//!   stop it

pub mod executor;
pub mod signal;
pub mod types;

pub use executor::{CommandExecutor, CommandExecutorHandle, Connector, FnConnector};
pub use signal::{Wake, WakeSignal};
pub use types::{
    BackoffStrategy, CycleResult, ExecutionReport, ExecutorStats, HardCause, Jitter, RetryPolicy,
    SoftCause,
};
