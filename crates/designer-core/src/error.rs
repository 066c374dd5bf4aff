//! Error types for the designer core

use designer_bus::BusError;
use thiserror::Error;

/// Why a DAG description could not be turned into a `DagSpec`.
///
/// Syntax and structure problems share this type so the caller can show a
/// single "why parsing failed" message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid YAML: {0}")]
    Syntax(String),

    #[error("Document is empty")]
    Empty,

    #[error("Document root must be a mapping, found {0}")]
    NotAMapping(&'static str),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field `{field}` must be {expected}, found {found}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Field `name` must not be empty")]
    EmptyName,

    #[error("Unsupported content: {0}")]
    Unsupported(String),

    #[error("Failed to encode spec: {0}")]
    Encode(String),
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DesignerError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DesignerError {
    /// Whether the same call can succeed later without changing its input.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Bus(e) => e.is_retryable(),
            Self::Parse(_) | Self::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_messages() {
        assert_eq!(
            ParseError::MissingField("name").to_string(),
            "Missing required field: name"
        );
        assert_eq!(
            ParseError::WrongType {
                field: "tasks",
                expected: "a sequence",
                found: "a string"
            }
            .to_string(),
            "Field `tasks` must be a sequence, found a string"
        );
    }

    #[test]
    fn test_retryable() {
        let timeout = DesignerError::from(BusError::Timeout {
            subject: "workflow.designer.validate".into(),
            timeout_ms: 5000,
        });
        assert!(timeout.is_retryable());
        assert!(!DesignerError::from(ParseError::Empty).is_retryable());
    }
}
