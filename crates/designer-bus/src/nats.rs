//! NATS transport.
//!
//! Each subscription is pumped by its own task from the NATS subscriber into
//! the connection's sink, so subjects are consumed independently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::BusError;
use crate::message::Message;
use crate::transport::{
    Connector, EventHook, SubscriptionSink, Transport, TransportEvent, TransportSid,
};

/// Longest wait for the client to flush before giving up.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Connects to a NATS server with `async-nats`.
#[derive(Debug, Clone)]
pub struct NatsConnector {
    client_name: String,
}

impl NatsConnector {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl Default for NatsConnector {
    fn default() -> Self {
        Self::new("workflow-designer")
    }
}

#[async_trait]
impl Connector for NatsConnector {
    async fn connect(
        &self,
        endpoint: &str,
        events: EventHook,
    ) -> Result<Arc<dyn Transport>, BusError> {
        let client = async_nats::ConnectOptions::new()
            .name(self.client_name.as_str())
            .event_callback(move |event| {
                let events = events.clone();
                async move {
                    match event {
                        async_nats::Event::Disconnected => events(TransportEvent::Lost),
                        async_nats::Event::Connected => events(TransportEvent::Restored),
                        other => debug!(event = %other, "NATS client event"),
                    }
                }
            })
            .connect(endpoint)
            .await
            .map_err(|e| BusError::Connection {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        debug!(endpoint = endpoint, "Connected to NATS");

        Ok(Arc::new(NatsTransport {
            client,
            pumps: DashMap::new(),
            next_sid: AtomicU64::new(1),
        }))
    }
}

struct NatsTransport {
    client: async_nats::Client,
    pumps: DashMap<TransportSid, JoinHandle<()>>,
    next_sid: AtomicU64,
}

impl NatsTransport {
    /// Flush buffered commands. The client does not service flushes while it
    /// is reconnecting, so the wait is bounded.
    async fn flush(&self) -> Result<(), BusError> {
        match tokio::time::timeout(FLUSH_TIMEOUT, self.client.flush()).await {
            Ok(result) => result.map_err(|e| BusError::Transport(e.to_string())),
            Err(_) => Err(BusError::Transport(format!(
                "flush did not complete within {}ms",
                FLUSH_TIMEOUT.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(
        &self,
        subject: &str,
        reply: Option<&str>,
        payload: Bytes,
    ) -> Result<(), BusError> {
        let result = match reply {
            Some(reply) => {
                self.client
                    .publish_with_reply(subject.to_string(), reply.to_string(), payload)
                    .await
            }
            None => self.client.publish(subject.to_string(), payload).await,
        };
        result.map_err(|e| BusError::Transport(e.to_string()))?;
        self.flush().await
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
        sink: SubscriptionSink,
    ) -> Result<TransportSid, BusError> {
        let mut subscriber = match queue {
            Some(queue) => {
                self.client
                    .queue_subscribe(subject.to_string(), queue.to_string())
                    .await
            }
            None => self.client.subscribe(subject.to_string()).await,
        }
        .map_err(|e| BusError::Transport(e.to_string()))?;

        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        let subject = subject.to_string();
        let pump = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let message = Message {
                    subject: msg.subject.to_string(),
                    reply: msg.reply.map(|r| r.to_string()),
                    payload: msg.payload,
                };
                if sink.send(message).is_err() {
                    break;
                }
            }
            debug!(subject = %subject, "NATS subscription pump stopped");
        });
        self.pumps.insert(sid, pump);

        Ok(sid)
    }

    fn unsubscribe(&self, sid: TransportSid) {
        if let Some((_, pump)) = self.pumps.remove(&sid) {
            pump.abort();
        }
    }

    async fn close(&self) {
        let sids: Vec<TransportSid> = self.pumps.iter().map(|p| *p.key()).collect();
        for sid in sids {
            self.unsubscribe(sid);
        }
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Failed to flush NATS client on close");
        }
    }
}
