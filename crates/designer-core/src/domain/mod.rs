//! Domain Layer - Pure logic
//!
//! - `LogBuffer`: bounded, insertion-ordered log retention
//! - `transcoder`: DAG text to `DagSpec` and back
//!
//! RULES:
//! - No I/O operations
//! - No async code

pub mod log_buffer;
pub mod transcoder;

pub use log_buffer::LogBuffer;
