//! # Bus Messages
//!
//! The unit of delivery and the subject grammar.
//!
//! Subjects are `.`-separated tokens. Subscriptions may use `*` to match
//! exactly one token and `>` (last token only) to match one or more tokens.
//! Publish subjects never contain wildcards.

use bytes::Bytes;

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject the message was published on.
    pub subject: String,
    /// Reply subject set by the publisher, if any.
    pub reply: Option<String>,
    /// Raw payload.
    pub payload: Bytes,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}

fn tokens_are_valid(subject: &str) -> bool {
    !subject.is_empty()
        && subject
            .split('.')
            .all(|t| !t.is_empty() && !t.chars().any(char::is_whitespace))
}

/// Check a concrete subject (publish side): no wildcards allowed.
#[must_use]
pub fn is_valid_subject(subject: &str) -> bool {
    tokens_are_valid(subject) && subject.split('.').all(|t| t != "*" && t != ">")
}

/// Check a subscription filter: `*` anywhere, `>` only as the last token.
#[must_use]
pub fn is_valid_filter(filter: &str) -> bool {
    if !tokens_are_valid(filter) {
        return false;
    }
    let tokens: Vec<&str> = filter.split('.').collect();
    let last = tokens.len() - 1;
    tokens.iter().enumerate().all(|(i, t)| match *t {
        ">" => i == last,
        "*" => true,
        t => !t.contains('*') && !t.contains('>'),
    })
}

/// Check if a concrete subject matches a subscription filter.
#[must_use]
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
