//! # Designer Bus - Messaging Client Layer
//!
//! Connection lifecycle, subject subscriptions and request/reply correlation
//! over a subject-based publish/subscribe bus.
//!
//! ## Layout
//!
//! ```text
//!  ┌──────────────┐   request()   ┌──────────────┐
//!  │  Correlator  │ ────────────► │  Connection  │ ◄── subscribe() ── consumers
//!  └──────────────┘               │  + Registry  │
//!                                 └──────┬───────┘
//!                                        │ Transport
//!                        ┌───────────────┴───────────────┐
//!                        ▼                               ▼
//!                ┌──────────────┐                ┌──────────────┐
//!                │InMemoryBroker│                │  NATS (opt)  │
//!                └──────────────┘                └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Per-subject FIFO:** each subscription sees messages in arrival order
//! - **No orphans:** every subscription is registered with its connection and
//!   released on unsubscribe, drop, close or link loss
//! - **One reply per request:** the inbox is released after the first reply

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod inbox;
pub mod message;
#[cfg(feature = "nats")]
pub mod nats;
pub mod registry;
pub mod subscription;
pub mod transport;

use std::time::Duration;

pub use broker::{InMemoryBroker, MemoryConnector};
pub use connection::{connect, Connection, ConnectionState};
pub use correlator::{Correlator, PendingInfo, RequestState, RequestStats};
pub use error::BusError;
pub use inbox::{CorrelationId, InboxGenerator};
pub use message::{is_valid_filter, is_valid_subject, subject_matches, Message};
#[cfg(feature = "nats")]
pub use nats::NatsConnector;
pub use registry::{SubscriptionId, SubscriptionInfo, SubscriptionRegistry};
pub use subscription::{Subscription, SubscriptionError, SubscriptionStatus};
pub use transport::{Connector, EventHook, SubscriptionSink, Transport, TransportEvent};

/// Reply window used when a request does not name one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Informational endpoint for the in-process broker.
pub const MEMORY_ENDPOINT: &str = "memory://local";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout() {
        assert_eq!(DEFAULT_REQUEST_TIMEOUT.as_millis(), 5000);
    }

    #[test]
    fn test_memory_endpoint_is_informational() {
        assert!(MEMORY_ENDPOINT.starts_with("memory://"));
    }
}
