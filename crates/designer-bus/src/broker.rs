//! # In-Memory Broker
//!
//! An in-process bus with the routing semantics of a subject-based broker:
//! wildcard filters, queue groups and per-subscriber FIFO delivery.
//!
//! Suitable for tests and single-process deployments; a networked deployment
//! uses the NATS transport instead. The broker can be made unreachable and can
//! sever every client link, which is how connection failures are exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::BusError;
use crate::message::{subject_matches, Message};
use crate::transport::{
    Connector, EventHook, SubscriptionSink, Transport, TransportEvent, TransportSid,
};

struct BrokerSubscriber {
    client_id: u64,
    filter: String,
    queue: Option<String>,
    sink: SubscriptionSink,
}

struct BrokerClient {
    hook: EventHook,
    online: Arc<AtomicBool>,
}

struct BrokerInner {
    /// Active subscriptions by broker-wide sid.
    subscribers: RwLock<HashMap<TransportSid, BrokerSubscriber>>,
    /// Connected clients by id.
    clients: Mutex<HashMap<u64, BrokerClient>>,
    /// Round-robin cursors per (filter, queue group).
    queue_cursors: Mutex<HashMap<(String, String), usize>>,
    next_sid: AtomicU64,
    next_client: AtomicU64,
    reachable: AtomicBool,
    messages_published: AtomicU64,
}

/// In-process message broker.
///
/// Cheap to clone; clones share the same routing table.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    /// Create a reachable broker with no clients.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscribers: RwLock::new(HashMap::new()),
                clients: Mutex::new(HashMap::new()),
                queue_cursors: Mutex::new(HashMap::new()),
                next_sid: AtomicU64::new(1),
                next_client: AtomicU64::new(1),
                reachable: AtomicBool::new(true),
                messages_published: AtomicU64::new(0),
            }),
        }
    }

    /// Connector that attaches clients to this broker.
    #[must_use]
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    /// Publish directly on the broker, as an external publisher would.
    ///
    /// Returns the number of subscriptions the message was delivered to.
    pub fn publish(&self, subject: &str, reply: Option<&str>, payload: impl Into<Bytes>) -> usize {
        self.inner.route(subject, reply, payload.into())
    }

    /// Make subsequent connect attempts fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }

    /// Drop every client link, as if the broker went away.
    ///
    /// Each client's subscriptions are removed and its connection is told the
    /// link was lost. Returns the number of clients severed.
    pub fn sever(&self) -> usize {
        let clients: Vec<BrokerClient> = self.inner.clients.lock().drain().map(|(_, c)| c).collect();
        self.inner.subscribers.write().clear();

        for client in &clients {
            client.online.store(false, Ordering::SeqCst);
        }
        // Hooks run without broker locks held: they call back into unsubscribe.
        for client in &clients {
            (client.hook)(TransportEvent::Lost);
        }

        warn!(clients = clients.len(), "Broker severed all client links");
        clients.len()
    }

    /// Total active subscriptions across all clients.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Subscriptions that would receive a message published on `subject`.
    #[must_use]
    pub fn interest(&self, subject: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .values()
            .filter(|s| subject_matches(&s.filter, subject))
            .count()
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().len()
    }

    /// Total messages published through the broker.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.inner.messages_published.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerInner {
    fn route(&self, subject: &str, reply: Option<&str>, payload: Bytes) -> usize {
        self.messages_published.fetch_add(1, Ordering::Relaxed);

        let message = Message {
            subject: subject.to_string(),
            reply: reply.map(str::to_string),
            payload,
        };

        let subscribers = self.subscribers.read();
        let mut delivered = 0;
        let mut groups: HashMap<(String, String), Vec<&BrokerSubscriber>> = HashMap::new();

        // Iterate in sid order so queue-group rotation is deterministic.
        let mut matching: Vec<(&TransportSid, &BrokerSubscriber)> = subscribers
            .iter()
            .filter(|(_, s)| subject_matches(&s.filter, subject))
            .collect();
        matching.sort_by_key(|(sid, _)| **sid);

        for (_, sub) in matching {
            match &sub.queue {
                Some(queue) => groups
                    .entry((sub.filter.clone(), queue.clone()))
                    .or_default()
                    .push(sub),
                None => {
                    if sub.sink.send(message.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        if !groups.is_empty() {
            let mut cursors = self.queue_cursors.lock();
            for (key, members) in groups {
                let cursor = cursors.entry(key).or_insert(0);
                let member = members[*cursor % members.len()];
                *cursor = cursor.wrapping_add(1);
                if member.sink.send(message.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        debug!(subject = subject, receivers = delivered, "Message routed");
        delivered
    }

    fn add_subscriber(&self, subscriber: BrokerSubscriber) -> TransportSid {
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().insert(sid, subscriber);
        sid
    }

    fn remove_subscriber(&self, sid: TransportSid) {
        self.subscribers.write().remove(&sid);
    }

    fn remove_client(&self, client_id: u64) {
        self.clients.lock().remove(&client_id);
        self.subscribers
            .write()
            .retain(|_, s| s.client_id != client_id);
    }
}

/// Connector for an `InMemoryBroker`. The endpoint string is informational.
#[derive(Clone)]
pub struct MemoryConnector {
    broker: InMemoryBroker,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        endpoint: &str,
        events: EventHook,
    ) -> Result<Arc<dyn Transport>, BusError> {
        let inner = &self.broker.inner;
        if !inner.reachable.load(Ordering::SeqCst) {
            return Err(BusError::Connection {
                endpoint: endpoint.to_string(),
                reason: "broker unreachable".to_string(),
            });
        }

        let client_id = inner.next_client.fetch_add(1, Ordering::Relaxed);
        let online = Arc::new(AtomicBool::new(true));
        inner.clients.lock().insert(
            client_id,
            BrokerClient {
                hook: events,
                online: online.clone(),
            },
        );

        debug!(endpoint = endpoint, client_id = client_id, "Client attached to in-memory broker");

        Ok(Arc::new(MemoryTransport {
            broker: inner.clone(),
            client_id,
            online,
        }))
    }
}

/// One client's link to an `InMemoryBroker`.
struct MemoryTransport {
    broker: Arc<BrokerInner>,
    client_id: u64,
    online: Arc<AtomicBool>,
}

impl MemoryTransport {
    fn ensure_online(&self) -> Result<(), BusError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BusError::Transport("link to in-memory broker is down".to_string()))
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        subject: &str,
        reply: Option<&str>,
        payload: Bytes,
    ) -> Result<(), BusError> {
        self.ensure_online()?;
        self.broker.route(subject, reply, payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
        sink: SubscriptionSink,
    ) -> Result<TransportSid, BusError> {
        self.ensure_online()?;
        Ok(self.broker.add_subscriber(BrokerSubscriber {
            client_id: self.client_id,
            filter: subject.to_string(),
            queue: queue.map(str::to_string),
            sink,
        }))
    }

    fn unsubscribe(&self, sid: TransportSid) {
        self.broker.remove_subscriber(sid);
    }

    async fn close(&self) {
        self.online.store(false, Ordering::SeqCst);
        self.broker.remove_client(self.client_id);
        debug!(client_id = self.client_id, "Client detached from in-memory broker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn noop_hook() -> EventHook {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_publish_no_subscribers() {
        let broker = InMemoryBroker::new();
        assert_eq!(broker.publish("workflow.logs.stream", None, "x"), 0);
        assert_eq!(broker.messages_published(), 1);
    }

    #[tokio::test]
    async fn test_wildcard_routing() {
        let broker = InMemoryBroker::new();
        let transport = broker.connector().connect("memory://test", noop_hook()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe("workflow.events.>", None, tx).await.unwrap();

        assert_eq!(broker.publish("workflow.events.run.started", None, "a"), 1);
        assert_eq!(broker.publish("workflow.logs.stream", None, "b"), 0);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.subject, "workflow.events.run.started");
        assert_eq!(msg.payload, Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn test_queue_group_delivers_to_one_member() {
        let broker = InMemoryBroker::new();
        let transport = broker.connector().connect("memory://test", noop_hook()).await.unwrap();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        transport.subscribe("jobs", Some("workers"), tx1).await.unwrap();
        transport.subscribe("jobs", Some("workers"), tx2).await.unwrap();

        for i in 0..4 {
            assert_eq!(broker.publish("jobs", None, format!("{i}")), 1);
        }

        let mut first = 0;
        while rx1.try_recv().is_ok() {
            first += 1;
        }
        let mut second = 0;
        while rx2.try_recv().is_ok() {
            second += 1;
        }
        assert_eq!(first, 2);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_unreachable_connect_fails() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);

        let result = broker.connector().connect("memory://down", noop_hook()).await;
        assert!(matches!(result, Err(BusError::Connection { .. })));
        assert_eq!(broker.client_count(), 0);
    }

    #[tokio::test]
    async fn test_sever_reports_loss_and_drops_sinks() {
        let broker = InMemoryBroker::new();
        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();
        let hook: EventHook = Arc::new(move |event| {
            if event == TransportEvent::Lost {
                flag.store(true, Ordering::SeqCst);
            }
        });

        let transport = broker.connector().connect("memory://test", hook).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe("a.b", None, tx).await.unwrap();

        assert_eq!(broker.sever(), 1);
        assert!(lost.load(Ordering::SeqCst));
        assert!(rx.recv().await.is_none());
        assert!(transport.publish("a.b", None, Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_removes_client_subscriptions() {
        let broker = InMemoryBroker::new();
        let transport = broker.connector().connect("memory://test", noop_hook()).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.subscribe("a.b", None, tx).await.unwrap();
        assert_eq!(broker.subscriber_count(), 1);

        transport.close().await;
        assert_eq!(broker.subscriber_count(), 0);
        assert_eq!(broker.client_count(), 0);
    }
}
