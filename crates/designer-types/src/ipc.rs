//! # Wire Messages
//!
//! JSON payloads exchanged with the orchestrator.
//!
//! | Subject | Direction | Payload |
//! |---------|-----------|---------|
//! | `workflow.logs.stream` | orchestrator → client | `LogEntry` |
//! | `workflow.designer.validate` | client → orchestrator | `ValidateDagRequest` |
//! | `<replyTo>` | orchestrator → client | `ValidationReply` |

use serde::{Deserialize, Deserializer, Serialize};

use crate::entities::DagSpec;
use crate::errors::DecodeError;

/// Fire-and-forget log stream published by the orchestrator.
pub const LOG_STREAM_SUBJECT: &str = "workflow.logs.stream";

/// Validation requests for authored DAGs.
pub const VALIDATE_SUBJECT: &str = "workflow.designer.validate";

/// Namespace for ephemeral reply subjects.
pub const DEFAULT_INBOX_PREFIX: &str = "designer.inbox";

/// Validation request. `reply_to` is the ephemeral inbox unique to this request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateDagRequest {
    pub dag: DagSpec,
    pub reply_to: String,
}

impl ValidateDagRequest {
    pub fn new(dag: DagSpec, reply_to: impl Into<String>) -> Self {
        Self {
            dag,
            reply_to: reply_to.into(),
        }
    }
}

/// Orchestrator's answer to a `ValidateDagRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReply {
    pub valid: bool,
    /// Ordered validation errors. Absent or `null` on the wire decodes as empty.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub errors: Vec<String>,
}

impl ValidationReply {
    #[must_use]
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }

    /// Decode a reply payload.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` when the payload is not a reply object.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(raw).map_err(|e| DecodeError::new("validation reply", e))
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
