//! `statusq-commands`: the unit of background work and its execution record.
//!
//! A [`CommandUnit`] pairs a [`Command`] (what to do, and to whom) with an
//! [`ExecutionOutcome`] (what happened on each attempt). Equality and hashing
//! only ever look at the command, so queues can de-duplicate identical work
//! while each enqueued instance keeps its own attempt telemetry.
//!
//! Nothing here performs I/O. Lookups of accounts, origins and users go through
//! an explicit [`CommandContext`] supplied by the caller.

pub mod command;
pub mod context;
pub mod kind;
pub mod outcome;
pub mod unit;

pub use command::{Command, SearchObjects, TimelineType};
pub use context::{CommandContext, InMemoryContext};
pub use kind::{CommandKind, PriorityTier};
pub use outcome::{ErrorClass, ExecutionOutcome, INITIAL_RETRIES, OutcomeError, OutcomePhase};
pub use unit::CommandUnit;
