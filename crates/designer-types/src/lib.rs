//! # Designer Types Crate
//!
//! Entities and wire messages exchanged between the workflow designer and the
//! orchestrator over the message bus.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: The JSON wire contract lives here and nowhere else.
//! - **Immutable Records**: A `LogEntry` is never mutated after it is decoded.
//! - **Structural Only**: `DagSpec` carries structure; semantic validity is the
//!   orchestrator's call.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod entities;
pub mod errors;
pub mod ipc;

pub use entities::{DagSpec, LevelFilter, LogEntry, LogLevel};
pub use errors::DecodeError;
pub use ipc::{
    ValidateDagRequest, ValidationReply, DEFAULT_INBOX_PREFIX, LOG_STREAM_SUBJECT,
    VALIDATE_SUBJECT,
};
