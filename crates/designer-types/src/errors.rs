//! # Error Types
//!
//! Errors raised while turning wire bytes into typed values.

use thiserror::Error;

/// A payload did not match the expected schema.
///
/// Used for both log stream entries and request replies, so a caller can tell
/// "bad answer" apart from "no answer".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to decode {what}: {reason}")]
pub struct DecodeError {
    /// What was being decoded (e.g. "log entry", "validation reply").
    pub what: &'static str,
    /// Underlying cause.
    pub reason: String,
}

impl DecodeError {
    pub fn new(what: &'static str, reason: impl ToString) -> Self {
        Self {
            what,
            reason: reason.to_string(),
        }
    }
}

/// A level name that is not one of DEBUG, INFO, WARN, ERROR (or ALL for filters).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown log level: {0}")]
pub struct UnknownLevel(pub String);
