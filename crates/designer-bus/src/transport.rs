//! # Transport Ports
//!
//! The seam between the connection manager and a concrete bus client.
//! `InMemoryBroker` implements it in-process; the `nats` feature adds a
//! NATS implementation.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::message::Message;

/// Transport-local subscription id.
pub type TransportSid = u64;

/// Queue into which a transport delivers messages for one subscription.
///
/// Unbounded so a slow consumer on one subject never stalls delivery on another.
pub type SubscriptionSink = mpsc::UnboundedSender<Message>;

/// Asynchronous link events reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link dropped.
    Lost,
    /// The client re-established the link on its own.
    Restored,
}

/// Callback a transport uses to report link events to its connection.
pub type EventHook = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// An established link to the bus.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a payload, optionally carrying a reply subject.
    async fn publish(
        &self,
        subject: &str,
        reply: Option<&str>,
        payload: Bytes,
    ) -> Result<(), BusError>;

    /// Start delivering messages matching `subject` into `sink`.
    ///
    /// With a `queue` group, each message goes to one member of the group.
    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
        sink: SubscriptionSink,
    ) -> Result<TransportSid, BusError>;

    /// Stop delivery for `sid` and drop its sink.
    ///
    /// Synchronous so it can run from `Drop`. Unknown ids are ignored.
    fn unsubscribe(&self, sid: TransportSid);

    /// Tear the link down. All sinks are dropped.
    async fn close(&self);
}

/// Factory for transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a link to `endpoint`.
    ///
    /// # Errors
    ///
    /// `BusError::Connection` when the endpoint is unreachable or rejects the
    /// client. A failed attempt must not hold on to any resources.
    async fn connect(&self, endpoint: &str, events: EventHook)
        -> Result<Arc<dyn Transport>, BusError>;
}
