//! `statusq-core`: identifiers and error primitives shared by every layer.
//!
//! This crate has no knowledge of queues, stores or connectors.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AccountName, CommandId, DownloadId, MessageId, OriginId, UserId};
