//! # Connection Manager
//!
//! Owns the single logical link to the bus and every subscription made
//! through it.
//!
//! ## State Machine
//!
//! ```text
//!                 connect()              ok
//!  Disconnected ───────────► Connecting ─────► Connected
//!       ▲                        │                 │
//!       │          err           │                 │ link lost
//!       ├────────────────────────┘                 │
//!       └──────────────────────────────────────────┘
//!
//!  any state ── close() ──► Closing ──► Closed   (terminal)
//! ```
//!
//! ## Link Loss
//!
//! Subscriptions do not survive a lost link. When the transport reports a
//! loss every registered subscription is released (its stream ends and any
//! request waiting on it fails) and the state returns to `Disconnected`.
//! Callers re-subscribe after `connect()` succeeds again.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::message::{is_valid_filter, is_valid_subject};
use crate::registry::{SubscriptionId, SubscriptionRecord, SubscriptionRegistry};
use crate::subscription::Subscription;
use crate::transport::{Connector, EventHook, Transport, TransportEvent};

/// Longest wait for a transport to tear down before it is abandoned.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle state of a `Connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

pub(crate) struct ConnectionInner {
    endpoint: String,
    connector: Arc<dyn Connector>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    state_tx: watch::Sender<ConnectionState>,
    registry: SubscriptionRegistry,
    /// Serializes connect and close.
    lifecycle: Mutex<()>,
    /// Bumped on every connect attempt and on close; stale link events are ignored.
    generation: AtomicU64,
    messages_published: AtomicU64,
}

impl ConnectionInner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(endpoint = %self.endpoint, from = %previous, to = %state, "Connection state changed");
        }
    }

    fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().clone()
    }

    /// Release one binding. Returns false if it was already gone.
    pub(crate) fn release(&self, id: SubscriptionId) -> bool {
        let Some(record) = self.registry.release(id) else {
            return false;
        };
        if let Some(transport) = self.current_transport() {
            transport.unsubscribe(record.sid);
        }
        true
    }

    fn release_all(&self) -> usize {
        let records = self.registry.release_all();
        if let Some(transport) = self.current_transport() {
            for record in &records {
                transport.unsubscribe(record.sid);
            }
        }
        records.len()
    }

    fn on_transport_event(&self, generation: u64, event: TransportEvent) {
        if generation != self.generation.load(Ordering::SeqCst) {
            return;
        }
        match event {
            TransportEvent::Lost => {
                if self.state() != ConnectionState::Connected {
                    return;
                }
                let released = self.release_all();
                self.set_state(ConnectionState::Disconnected);
                warn!(
                    endpoint = %self.endpoint,
                    released_subscriptions = released,
                    "Bus link lost"
                );
            }
            TransportEvent::Restored => {
                if self.state() == ConnectionState::Disconnected
                    && self.transport.read().is_some()
                {
                    self.set_state(ConnectionState::Connected);
                    info!(endpoint = %self.endpoint, "Bus link restored");
                }
            }
        }
    }

    fn event_hook(self: &Arc<Self>, generation: u64) -> EventHook {
        let weak: Weak<ConnectionInner> = Arc::downgrade(self);
        Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_transport_event(generation, event);
            }
        })
    }
}

/// The process's link to the bus.
///
/// Cheap to clone; clones share the link, state and registry.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Create a connection in the `Disconnected` state.
    pub fn new(endpoint: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ConnectionInner {
                endpoint: endpoint.into(),
                connector,
                transport: RwLock::new(None),
                state_tx,
                registry: SubscriptionRegistry::new(),
                lifecycle: Mutex::new(()),
                generation: AtomicU64::new(0),
                messages_published: AtomicU64::new(0),
            }),
        }
    }

    /// Establish the link.
    ///
    /// A no-op when already connected. On failure the state returns to
    /// `Disconnected` and nothing from the attempt is retained, so the call
    /// can simply be repeated.
    ///
    /// # Errors
    ///
    /// - `BusError::Connection` - endpoint unreachable or connect rejected
    /// - `BusError::Closed` - the connection was closed
    pub async fn connect(&self) -> Result<(), BusError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        match self.inner.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => return Err(BusError::Closed),
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        // A link that was lost is replaced, not reused.
        let stale = self.inner.transport.write().take();
        if let Some(stale) = stale {
            close_transport(&self.inner.endpoint, stale).await;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.set_state(ConnectionState::Connecting);

        let hook = self.inner.event_hook(generation);
        let started = Instant::now();
        match self.inner.connector.connect(&self.inner.endpoint, hook).await {
            Ok(transport) => {
                *self.inner.transport.write() = Some(transport);
                self.inner.set_state(ConnectionState::Connected);
                info!(
                    endpoint = %self.inner.endpoint,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Connected to bus"
                );
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                warn!(endpoint = %self.inner.endpoint, error = %e, "Bus connect failed");
                Err(e)
            }
        }
    }

    /// Release every subscription and tear the link down.
    ///
    /// Idempotent: closing a closed connection does nothing.
    pub async fn close(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.inner.state() == ConnectionState::Closed {
            return;
        }

        self.inner.set_state(ConnectionState::Closing);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        let released = self.inner.release_all();
        let transport = self.inner.transport.write().take();
        if let Some(transport) = transport {
            close_transport(&self.inner.endpoint, transport).await;
        }

        self.inner.set_state(ConnectionState::Closed);
        info!(
            endpoint = %self.inner.endpoint,
            released_subscriptions = released,
            "Connection closed"
        );
    }

    /// Publish a payload on `subject`.
    ///
    /// # Errors
    ///
    /// `BusError::NotConnected` unless the connection is `Connected`.
    pub async fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<(), BusError> {
        self.publish_inner(subject, None, payload.into()).await
    }

    /// Publish a payload carrying a reply subject.
    ///
    /// # Errors
    ///
    /// `BusError::NotConnected` unless the connection is `Connected`.
    pub async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), BusError> {
        if !is_valid_subject(reply) {
            return Err(BusError::InvalidSubject(reply.to_string()));
        }
        self.publish_inner(subject, Some(reply), payload.into()).await
    }

    async fn publish_inner(
        &self,
        subject: &str,
        reply: Option<&str>,
        payload: Bytes,
    ) -> Result<(), BusError> {
        if !is_valid_subject(subject) {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }
        let transport = self.connected_transport()?;
        let size = payload.len();

        transport.publish(subject, reply, payload).await?;
        self.inner.messages_published.fetch_add(1, Ordering::Relaxed);

        debug!(subject = subject, reply = ?reply, bytes = size, "Message published");
        Ok(())
    }

    /// Bind to `subject` (wildcards allowed).
    ///
    /// # Errors
    ///
    /// `BusError::NotConnected` unless the connection is `Connected`.
    pub async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        self.subscribe_inner(subject, None).await
    }

    /// Bind to `subject` as a member of `queue`; each message goes to one member.
    ///
    /// # Errors
    ///
    /// `BusError::NotConnected` unless the connection is `Connected`.
    pub async fn queue_subscribe(
        &self,
        subject: &str,
        queue: &str,
    ) -> Result<Subscription, BusError> {
        self.subscribe_inner(subject, Some(queue)).await
    }

    async fn subscribe_inner(
        &self,
        subject: &str,
        queue: Option<&str>,
    ) -> Result<Subscription, BusError> {
        if !is_valid_filter(subject) {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }
        let transport = self.connected_transport()?;

        let (sink, receiver) = mpsc::unbounded_channel();
        let sid = transport.subscribe(subject, queue, sink).await?;

        let id = self.inner.registry.next_id();
        let active = Arc::new(AtomicBool::new(true));
        self.inner.registry.insert(SubscriptionRecord {
            id,
            subject: subject.to_string(),
            queue: queue.map(str::to_string),
            sid,
            active: active.clone(),
            created_at: Instant::now(),
        });

        // The link may have dropped while the transport call was in flight.
        if self.inner.state() != ConnectionState::Connected {
            self.inner.release(id);
            return Err(BusError::NotConnected {
                state: self.inner.state(),
            });
        }

        Ok(Subscription::new(
            id,
            subject.to_string(),
            receiver,
            active,
            Arc::downgrade(&self.inner),
        ))
    }

    /// Release a binding by handle.
    pub fn unsubscribe(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    fn connected_transport(&self) -> Result<Arc<dyn Transport>, BusError> {
        let state = self.inner.state();
        if state != ConnectionState::Connected {
            return Err(BusError::NotConnected { state });
        }
        self.inner
            .current_transport()
            .ok_or(BusError::NotConnected { state })
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver for state change notifications.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.inner.registry.active_count()
    }

    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.inner.messages_published.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .field("subscriptions", &self.active_subscriptions())
            .finish()
    }
}

/// Tear a transport down without letting a stuck client block the lifecycle.
async fn close_transport(endpoint: &str, transport: Arc<dyn Transport>) {
    if tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await.is_err() {
        warn!(
            endpoint = endpoint,
            timeout_ms = CLOSE_TIMEOUT.as_millis() as u64,
            "Transport close timed out, abandoning link"
        );
    }
}

/// Create a connection and establish it in one step.
///
/// # Errors
///
/// `BusError::Connection` if the endpoint cannot be reached.
pub async fn connect(
    endpoint: impl Into<String>,
    connector: Arc<dyn Connector>,
) -> Result<Connection, BusError> {
    let connection = Connection::new(endpoint, connector);
    connection.connect().await?;
    Ok(connection)
}
