//! Log stream consumer.
//!
//! One task per subscription drains `workflow.logs.stream`, decodes each
//! message and appends it to the `LogBuffer`. The task is the buffer's only
//! writer; readers take snapshots through the lock. Messages already queued
//! when the task wakes are coalesced into one `LogBatch` so the UI re-renders
//! once per burst instead of once per entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use designer_bus::{Message, Subscription, SubscriptionStatus};
use designer_telemetry::{
    metric_inc, LOG_BUFFER_ENTRIES, LOG_ENTRIES_DROPPED, LOG_ENTRIES_EVICTED, LOG_ENTRIES_RECEIVED,
};
use designer_types::{LevelFilter, LogEntry};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::LogBuffer;
use crate::ports::{ErrorSink, LogBatch, LogViewApi};

/// Upper bound on entries coalesced into one batch.
pub const MAX_BATCH: usize = 64;

/// Batches buffered for slow batch subscribers before they start lagging.
const BATCH_CHANNEL_CAPACITY: usize = 256;

struct StreamState {
    buffer: RwLock<LogBuffer>,
    filter: RwLock<LevelFilter>,
    batches: broadcast::Sender<LogBatch>,
    sink: Arc<dyn ErrorSink>,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl StreamState {
    fn ingest(&self, message: &Message, batch: &mut LogBatch) {
        match LogEntry::decode(&message.payload) {
            Ok(entry) => {
                let evicted = self.buffer.write().append(entry.clone());
                if evicted.is_some() {
                    batch.evicted += 1;
                    metric_inc!(LOG_ENTRIES_EVICTED);
                }
                self.received.fetch_add(1, Ordering::Relaxed);
                metric_inc!(LOG_ENTRIES_RECEIVED);
                batch.entries.push(entry);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metric_inc!(LOG_ENTRIES_DROPPED);
                self.sink.report(&message.subject, &e);
            }
        }
    }

    fn publish(&self, batch: LogBatch) {
        LOG_BUFFER_ENTRIES.set(self.buffer.read().len() as f64);
        if batch.is_empty() {
            return;
        }
        // No receivers is fine: nobody is rendering right now.
        let _ = self.batches.send(batch);
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    status: SubscriptionStatus,
}

impl Running {
    /// Consuming a subscription that is still registered.
    fn is_live(&self) -> bool {
        self.status.is_active() && !self.task.is_finished()
    }
}

/// Bounded, filtered view over the orchestrator's log stream.
pub struct LogStream {
    state: Arc<StreamState>,
    running: Mutex<Option<Running>>,
}

impl LogStream {
    pub fn new(capacity: usize, filter: LevelFilter, sink: Arc<dyn ErrorSink>) -> Self {
        let (batches, _) = broadcast::channel(BATCH_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(StreamState {
                buffer: RwLock::new(LogBuffer::new(capacity)),
                filter: RwLock::new(filter),
                batches,
                sink,
                received: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            running: Mutex::new(None),
        }
    }

    /// Start consuming `subscription`.
    ///
    /// A live consumer keeps running and the new subscription is released.
    /// A consumer whose subscription was released (link lost) is replaced:
    /// the new consumer waits for it to drain what was already queued before
    /// reading, so the buffer keeps a single writer and arrival order.
    /// Retained entries are kept across restarts.
    ///
    /// Returns whether a new consumer was started.
    pub fn start(&self, subscription: Subscription) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(Running::is_live) {
            debug!(subject = subscription.subject(), "Log consumer already running");
            subscription.unsubscribe();
            return false;
        }

        let previous = running.take().map(|r| r.task);
        let status = subscription.status();
        let (shutdown, shutdown_rx) = watch::channel(false);
        info!(subject = subscription.subject(), "Starting log consumer");
        let task = tokio::spawn(consume(
            self.state.clone(),
            subscription,
            shutdown_rx,
            previous,
        ));
        *running = Some(Running {
            shutdown,
            task,
            status,
        });
        true
    }

    /// Stop the consumer and wait for it to release its subscription.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.task.await {
                debug!(error = %e, "Log consumer ended abnormally");
            }
        }
    }

    /// Whether a consumer is attached to a registered subscription.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(Running::is_live)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.buffer.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.buffer.read().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.buffer.read().capacity()
    }

    /// Entries decoded since creation.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.state.received.load(Ordering::Relaxed)
    }

    /// Messages dropped because they did not decode.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.state.buffer.read().evicted_total()
    }
}

impl LogViewApi for LogStream {
    fn view(&self) -> Vec<LogEntry> {
        let filter = *self.state.filter.read();
        self.state.buffer.read().filter(filter)
    }

    fn snapshot(&self) -> Vec<LogEntry> {
        self.state.buffer.read().snapshot()
    }

    fn filter(&self) -> LevelFilter {
        *self.state.filter.read()
    }

    fn set_filter(&self, filter: LevelFilter) {
        *self.state.filter.write() = filter;
        debug!(filter = %filter, "Log filter changed");
    }

    fn subscribe_batches(&self) -> broadcast::Receiver<LogBatch> {
        self.state.batches.subscribe()
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.task.abort();
        }
    }
}

async fn consume(
    state: Arc<StreamState>,
    mut subscription: Subscription,
    mut shutdown: watch::Receiver<bool>,
    previous: Option<JoinHandle<()>>,
) {
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            debug!(error = %e, "Previous log consumer ended abnormally");
        }
    }

    loop {
        tokio::select! {
            biased;
            // A dropped sender means a replaced consumer: keep draining.
            Ok(()) = shutdown.changed() => break,
            next = subscription.recv() => {
                let Some(first) = next else {
                    debug!(subject = subscription.subject(), "Log subscription ended");
                    break;
                };
                let mut batch = LogBatch { entries: Vec::new(), evicted: 0 };
                state.ingest(&first, &mut batch);
                while batch.entries.len() < MAX_BATCH {
                    match subscription.try_recv() {
                        Ok(Some(message)) => state.ingest(&message, &mut batch),
                        _ => break,
                    }
                }
                state.publish(batch);
            }
        }
    }
    subscription.unsubscribe();
    info!("Log consumer stopped");
}
