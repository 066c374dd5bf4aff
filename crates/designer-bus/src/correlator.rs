//! # Request/Reply Correlator
//!
//! Turns a publish/subscribe bus into a request/reply channel.
//!
//! Flow:
//! 1. Allocate a correlation id and its inbox subject
//! 2. Subscribe to the inbox (before publishing, so a fast reply is not lost)
//! 3. Publish the request carrying the inbox as its reply subject
//! 4. Accept the first message on the inbox, or time out
//! 5. Release the inbox subscription on every path
//!
//! Only the first reply resolves a request; anything arriving later on the
//! same inbox finds no subscriber.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use designer_types::DecodeError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::BusError;
use crate::inbox::{CorrelationId, InboxGenerator};
use crate::message::Message;

/// Resolution state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Resolved,
    TimedOut,
    /// Abandoned by the caller, or failed before a reply could arrive.
    Cancelled,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// An in-flight exchange.
struct PendingRequest {
    target: String,
    inbox: String,
    payload: Bytes,
    created_at: Instant,
    state: RequestState,
}

/// Read-only view of an in-flight exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub correlation_id: CorrelationId,
    pub target: String,
    pub inbox: String,
    pub payload_bytes: usize,
    pub age_ms: u128,
    pub state: RequestState,
}

/// Counters for request outcomes.
#[derive(Debug, Default)]
pub struct RequestStats {
    pub registered: AtomicU64,
    pub resolved: AtomicU64,
    pub timed_out: AtomicU64,
    pub cancelled: AtomicU64,
}

impl RequestStats {
    fn record(&self, state: RequestState) {
        let counter = match state {
            RequestState::Pending => &self.registered,
            RequestState::Resolved => &self.resolved,
            RequestState::TimedOut => &self.timed_out,
            RequestState::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Issues requests over a `Connection` and matches their replies.
pub struct Correlator {
    connection: Connection,
    inbox: InboxGenerator,
    default_timeout: Duration,
    pending: DashMap<CorrelationId, PendingRequest>,
    stats: Arc<RequestStats>,
}

impl Correlator {
    /// Create a correlator whose inboxes live under `inbox_prefix`.
    pub fn new(connection: Connection, inbox_prefix: &str, default_timeout: Duration) -> Self {
        Self {
            connection,
            inbox: InboxGenerator::new(inbox_prefix),
            default_timeout,
            pending: DashMap::new(),
            stats: Arc::new(RequestStats::default()),
        }
    }

    /// Send a request to `target` and wait for its single reply.
    ///
    /// `build` receives the inbox subject and returns the request payload, so
    /// protocols that embed the reply address in the body can do so.
    ///
    /// Cancel-safe: dropping the returned future releases the inbox and marks
    /// the request cancelled.
    ///
    /// # Errors
    ///
    /// - `BusError::NotConnected` - no active connection
    /// - `BusError::Timeout` - publish and reply did not both complete within
    ///   `timeout` (or the default)
    /// - `BusError::Closed` - the connection went away while waiting
    /// - whatever `build` returns
    pub async fn request<F>(
        &self,
        target: &str,
        timeout: Option<Duration>,
        build: F,
    ) -> Result<Message, BusError>
    where
        F: FnOnce(&str) -> Result<Bytes, BusError>,
    {
        let timeout = timeout.unwrap_or(self.default_timeout);
        // One window covers publishing and waiting: a stalled publish counts too.
        let deadline = tokio::time::Instant::now() + timeout;
        let (correlation_id, inbox) = self.inbox.next_inbox();

        let mut subscription = self.connection.subscribe(&inbox).await?;
        let mut guard = PendingGuard::register(self, correlation_id, target, &inbox);

        let payload = build(&inbox)?;
        guard.attach_payload(payload.clone());
        let publish = self.connection.publish_with_reply(target, &inbox, payload);
        let outcome = match tokio::time::timeout_at(deadline, publish).await {
            Ok(Ok(())) => tokio::time::timeout_at(deadline, subscription.recv()).await,
            Ok(Err(e)) => return Err(e),
            Err(elapsed) => Err(elapsed),
        };
        subscription.unsubscribe();

        match outcome {
            Ok(Some(reply)) => {
                let elapsed = guard.settle(RequestState::Resolved);
                debug!(
                    correlation_id = %correlation_id,
                    target = target,
                    response_time_ms = elapsed.as_millis() as u64,
                    "Request resolved"
                );
                Ok(reply)
            }
            Ok(None) => {
                guard.settle(RequestState::Cancelled);
                warn!(correlation_id = %correlation_id, target = target, "Connection lost while awaiting reply");
                Err(BusError::Closed)
            }
            Err(_) => {
                guard.settle(RequestState::TimedOut);
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    correlation_id = %correlation_id,
                    target = target,
                    timeout_ms = timeout_ms,
                    "Request timed out"
                );
                Err(BusError::Timeout {
                    subject: target.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    /// JSON request/reply.
    ///
    /// # Errors
    ///
    /// As `request`, plus `BusError::Encode` if the request cannot be
    /// serialized and `BusError::Decode` if the reply does not match `Resp`.
    pub async fn request_json<Req, Resp, F>(
        &self,
        target: &str,
        timeout: Option<Duration>,
        build: F,
    ) -> Result<Resp, BusError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        F: FnOnce(&str) -> Req,
    {
        let reply = self
            .request(target, timeout, |inbox| {
                serde_json::to_vec(&build(inbox))
                    .map(Bytes::from)
                    .map_err(|e| BusError::Encode(e.to_string()))
            })
            .await?;

        serde_json::from_slice(&reply.payload)
            .map_err(|e| BusError::Decode(DecodeError::new("reply", e)))
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of in-flight requests, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingInfo> {
        let mut infos: Vec<PendingInfo> = self
            .pending
            .iter()
            .map(|entry| PendingInfo {
                correlation_id: *entry.key(),
                target: entry.target.clone(),
                inbox: entry.inbox.clone(),
                payload_bytes: entry.payload.len(),
                age_ms: entry.created_at.elapsed().as_millis(),
                state: entry.state,
            })
            .collect();
        infos.sort_by(|a, b| b.age_ms.cmp(&a.age_ms));
        infos
    }

    #[must_use]
    pub fn stats(&self) -> &RequestStats {
        &self.stats
    }

    #[must_use]
    pub fn inbox(&self) -> &InboxGenerator {
        &self.inbox
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("inbox", &self.inbox.session_prefix())
            .field("default_timeout", &self.default_timeout)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Keeps a request registered until it settles; unsettled on drop means cancelled.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: CorrelationId,
    settled: bool,
}

impl<'a> PendingGuard<'a> {
    fn register(correlator: &'a Correlator, id: CorrelationId, target: &str, inbox: &str) -> Self {
        correlator.pending.insert(
            id,
            PendingRequest {
                target: target.to_string(),
                inbox: inbox.to_string(),
                payload: Bytes::new(),
                created_at: Instant::now(),
                state: RequestState::Pending,
            },
        );
        correlator.stats.record(RequestState::Pending);
        debug!(correlation_id = %id, target = target, inbox = inbox, "Registered pending request");

        Self {
            correlator,
            id,
            settled: false,
        }
    }

    fn attach_payload(&mut self, payload: Bytes) {
        if let Some(mut request) = self.correlator.pending.get_mut(&self.id) {
            request.payload = payload;
        }
    }

    fn settle(&mut self, state: RequestState) -> Duration {
        self.settled = true;
        self.correlator.stats.record(state);
        self.correlator
            .pending
            .remove(&self.id)
            .map_or(Duration::ZERO, |(_, request)| request.created_at.elapsed())
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(RequestState::Cancelled);
            debug!(correlation_id = %self.id, "Pending request cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use serde_json::json;

    async fn setup() -> (InMemoryBroker, Correlator) {
        let broker = InMemoryBroker::new();
        let connection = Connection::new("memory://test", Arc::new(broker.connector()));
        connection.connect().await.unwrap();
        let correlator = Correlator::new(connection, "designer.inbox", Duration::from_millis(200));
        (broker, correlator)
    }

    /// Replies to every request on `subject` with `reply`.
    async fn echo_responder(broker: &InMemoryBroker, subject: &str, reply: &'static str) {
        let responder = Connection::new("memory://responder", Arc::new(broker.connector()));
        responder.connect().await.unwrap();
        let mut requests = responder.subscribe(subject).await.unwrap();
        tokio::spawn(async move {
            while let Some(msg) = requests.recv().await {
                if let Some(inbox) = msg.reply {
                    responder.publish(&inbox, reply).await.unwrap();
                }
            }
        });
    }

    #[tokio::test]
    async fn test_request_resolves() {
        let (broker, correlator) = setup().await;
        echo_responder(&broker, "svc.echo", "pong").await;

        let reply = correlator
            .request("svc.echo", None, |_| Ok(Bytes::from_static(b"ping")))
            .await
            .unwrap();

        assert_eq!(reply.payload, Bytes::from_static(b"pong"));
        assert!(correlator.inbox().owns(&reply.subject));
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.stats().resolved.load(Ordering::Relaxed), 1);
        assert_eq!(correlator.connection().active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_request_times_out_and_releases_inbox() {
        let (broker, correlator) = setup().await;
        let mut seen_inbox = String::new();

        let err = correlator
            .request("svc.nobody", Some(Duration::from_millis(20)), |inbox| {
                seen_inbox = inbox.to_string();
                Ok(Bytes::new())
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BusError::Timeout {
                subject: "svc.nobody".into(),
                timeout_ms: 20
            }
        );
        assert_eq!(broker.interest(&seen_inbox), 0);
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.stats().timed_out.load(Ordering::Relaxed), 1);
    }

    /// Transport whose publishes never complete, like a client stuck reconnecting.
    struct StalledTransport;

    #[async_trait::async_trait]
    impl crate::transport::Transport for StalledTransport {
        async fn publish(&self, _: &str, _: Option<&str>, _: Bytes) -> Result<(), BusError> {
            futures::future::pending().await
        }

        async fn subscribe(
            &self,
            _: &str,
            _: Option<&str>,
            _: crate::transport::SubscriptionSink,
        ) -> Result<crate::transport::TransportSid, BusError> {
            Ok(1)
        }

        fn unsubscribe(&self, _: crate::transport::TransportSid) {}

        async fn close(&self) {}
    }

    struct StalledConnector;

    #[async_trait::async_trait]
    impl crate::transport::Connector for StalledConnector {
        async fn connect(
            &self,
            _: &str,
            _: crate::transport::EventHook,
        ) -> Result<Arc<dyn crate::transport::Transport>, BusError> {
            Ok(Arc::new(StalledTransport))
        }
    }

    #[tokio::test]
    async fn test_stalled_publish_counts_against_timeout() {
        let connection = Connection::new("memory://stalled", Arc::new(StalledConnector));
        connection.connect().await.unwrap();
        let correlator = Correlator::new(connection, "designer.inbox", Duration::from_millis(30));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            correlator.request("svc.echo", None, |_| Ok(Bytes::new())),
        )
        .await
        .expect("request outlived its timeout");

        assert_eq!(
            result.unwrap_err(),
            BusError::Timeout {
                subject: "svc.echo".into(),
                timeout_ms: 30
            }
        );
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.connection().active_subscriptions(), 0);
        assert_eq!(correlator.stats().timed_out.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_request_json_decode_error_is_distinct() {
        let (broker, correlator) = setup().await;
        echo_responder(&broker, "svc.bad", "not json").await;

        let err = correlator
            .request_json::<_, serde_json::Value, _>("svc.bad", None, |inbox| {
                json!({ "replyTo": inbox })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::Decode(DecodeError { what: "reply", .. })));
    }

    #[tokio::test]
    async fn test_build_error_releases_inbox() {
        let (_broker, correlator) = setup().await;

        let err = correlator
            .request("svc.echo", None, |_| Err(BusError::Encode("nope".into())))
            .await
            .unwrap_err();

        assert_eq!(err, BusError::Encode("nope".into()));
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.connection().active_subscriptions(), 0);
        assert_eq!(correlator.stats().cancelled.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_request_requires_connection() {
        let broker = InMemoryBroker::new();
        let connection = Connection::new("memory://test", Arc::new(broker.connector()));
        let correlator = Correlator::new(connection, "designer.inbox", Duration::from_millis(50));

        let err = correlator
            .request("svc.echo", None, |_| Ok(Bytes::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotConnected { .. }));
        assert_eq!(correlator.stats().registered.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_dropped_request_is_cancelled() {
        let (_broker, correlator) = setup().await;

        {
            let fut = correlator.request("svc.nobody", Some(Duration::from_secs(10)), |_| {
                Ok(Bytes::new())
            });
            let _ = tokio::time::timeout(Duration::from_millis(10), fut).await;
        }

        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.connection().active_subscriptions(), 0);
        assert_eq!(correlator.stats().cancelled.load(Ordering::Relaxed), 1);
    }
}
