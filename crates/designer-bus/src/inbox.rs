//! Correlation ids and reply inboxes.
//!
//! Every outstanding request gets its own inbox subject:
//! `<base>.<session>.<request>`, where `session` is fixed for the lifetime of
//! the generator and `request` is a fresh correlation id.

use std::fmt;

use uuid::Uuid;

/// Correlation id for one request/reply exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from either the hyphenated or the simple form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders in simple form so the id is a single subject token.
impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Generates unique reply subjects for one client session.
#[derive(Debug, Clone)]
pub struct InboxGenerator {
    prefix: String,
}

impl InboxGenerator {
    /// Create a generator under `base` with a fresh session token.
    pub fn new(base: &str) -> Self {
        let base = base.trim_end_matches('.');
        Self {
            prefix: format!("{base}.{}", Uuid::new_v4().simple()),
        }
    }

    /// `<base>.<session>`, shared by every inbox this generator makes.
    #[must_use]
    pub fn session_prefix(&self) -> &str {
        &self.prefix
    }

    /// A fresh correlation id and its inbox subject.
    #[must_use]
    pub fn next_inbox(&self) -> (CorrelationId, String) {
        let id = CorrelationId::new();
        let subject = format!("{}.{id}", self.prefix);
        (id, subject)
    }

    /// Whether `subject` is an inbox produced by this generator.
    #[must_use]
    pub fn owns(&self, subject: &str) -> bool {
        subject
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|token| CorrelationId::parse(token).is_ok())
    }
}
