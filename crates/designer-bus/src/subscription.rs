//! # Subscription Handle
//!
//! The consumer side of a subject binding.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::connection::ConnectionInner;
use crate::message::Message;
use crate::registry::SubscriptionId;

/// Errors from non-blocking receive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The binding was released and its queue drained.
    #[error("Subscription closed")]
    Closed,
}

/// Shared view of whether a subscription is still registered.
///
/// Stays valid after the `Subscription` itself has moved into a consumer task.
#[derive(Debug, Clone)]
pub struct SubscriptionStatus(Arc<AtomicBool>);

impl SubscriptionStatus {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A live binding between a subject and this consumer.
///
/// Messages arrive in the order the transport delivered them. Dropping the
/// handle releases the binding; `unsubscribe` does so explicitly.
pub struct Subscription {
    id: SubscriptionId,
    subject: String,
    receiver: mpsc::UnboundedReceiver<Message>,
    active: Arc<AtomicBool>,
    owner: Weak<ConnectionInner>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        subject: String,
        receiver: mpsc::UnboundedReceiver<Message>,
        active: Arc<AtomicBool>,
        owner: Weak<ConnectionInner>,
    ) -> Self {
        Self {
            id,
            subject,
            receiver,
            active,
            owner,
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Whether the binding is still registered with its connection.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Handle that reports whether this binding is still registered.
    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus(self.active.clone())
    }

    /// Receive the next message.
    ///
    /// # Returns
    ///
    /// - `Some(message)` - The next message in arrival order
    /// - `None` - The binding was released (connection closed or lost)
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Try to receive the next message without waiting.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(message))` - A message was queued
    /// - `Ok(None)` - Nothing queued yet
    /// - `Err(SubscriptionError::Closed)` - Released and drained
    pub fn try_recv(&mut self) -> Result<Option<Message>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }

    /// Stop delivery and release the binding.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.release(self.id);
        }
        self.active.store(false, Ordering::SeqCst);
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("active", &self.is_active())
            .finish()
    }
}
