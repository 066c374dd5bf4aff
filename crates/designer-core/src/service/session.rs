//! # Designer Session
//!
//! The object a UI owns for its lifetime. Wires one bus connection to the
//! log stream and the designer service.
//!
//! ## Lifecycle
//!
//! ```text
//! new() ──► connect() ──► [use] ──► shutdown()
//!              ▲             │
//!              └─ link lost ─┘   (connect() again to resume the log stream)
//! ```
//!
//! The session holds no global state; tests create as many as they like.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use designer_bus::{Connection, ConnectionState, Connector, Correlator};
use designer_telemetry::{CONNECTION_STATE, SUBSCRIPTIONS_ACTIVE};
use designer_types::{LevelFilter, LogEntry};
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::config::DesignerConfig;
use crate::error::DesignerError;
use crate::ports::{ErrorSink, LogBatch, LogViewApi, TracingErrorSink};
use crate::service::designer::DesignerService;
use crate::service::log_stream::LogStream;

pub struct DesignerSession {
    config: DesignerConfig,
    connection: Connection,
    designer: DesignerService,
    logs: LogStream,
    state_watcher: AtomicBool,
}

impl DesignerSession {
    /// Create a disconnected session. Decode failures are logged.
    ///
    /// # Errors
    ///
    /// `DesignerError::Config` if the configuration is unusable.
    pub fn new(config: DesignerConfig, connector: Arc<dyn Connector>) -> Result<Self, DesignerError> {
        Self::with_error_sink(config, connector, Arc::new(TracingErrorSink::new()))
    }

    /// Create a disconnected session reporting decode failures to `sink`.
    pub fn with_error_sink(
        config: DesignerConfig,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self, DesignerError> {
        config.validate()?;

        let connection = Connection::new(config.nats_url.clone(), connector);
        let correlator = Arc::new(Correlator::new(
            connection.clone(),
            &config.inbox_prefix,
            config.validate_timeout,
        ));
        let designer = DesignerService::new(
            correlator,
            config.validate_subject.clone(),
            config.validate_timeout,
        );
        let logs = LogStream::new(config.log_capacity, config.log_filter, sink);

        Ok(Self {
            config,
            connection,
            designer,
            logs,
            state_watcher: AtomicBool::new(false),
        })
    }

    /// Connect to the bus and start consuming the log stream.
    ///
    /// Safe to call again after a failure or a lost link.
    ///
    /// # Errors
    ///
    /// `DesignerError::Bus` with `BusError::Connection` if the bus is
    /// unreachable, or `BusError::Closed` after `shutdown`.
    pub async fn connect(&self) -> Result<(), DesignerError> {
        self.watch_state_metrics();
        self.connection.connect().await?;

        if !self.logs.is_running() {
            let subscription = self.connection.subscribe(&self.config.log_subject).await?;
            self.logs.start(subscription);
        }
        SUBSCRIPTIONS_ACTIVE.set(self.connection.active_subscriptions() as f64);
        Ok(())
    }

    /// Stop the log stream and close the connection. Idempotent.
    pub async fn shutdown(&self) {
        self.logs.stop().await;
        self.connection.close().await;
        SUBSCRIPTIONS_ACTIVE.set(0.0);
        info!(endpoint = self.connection.endpoint(), "Designer session shut down");
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Connection state notifications.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Push notifications of new log entries.
    #[must_use]
    pub fn log_batches(&self) -> broadcast::Receiver<LogBatch> {
        self.logs.subscribe_batches()
    }

    /// Retained log entries passing the current filter.
    #[must_use]
    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.view()
    }

    pub fn set_filter(&self, filter: LevelFilter) {
        self.logs.set_filter(filter);
    }

    #[must_use]
    pub fn filter(&self) -> LevelFilter {
        self.logs.filter()
    }

    #[must_use]
    pub fn log_stream(&self) -> &LogStream {
        &self.logs
    }

    #[must_use]
    pub fn designer(&self) -> &DesignerService {
        &self.designer
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn config(&self) -> &DesignerConfig {
        &self.config
    }

    /// Mirror connection state into the `designer_connection_state` gauge.
    fn watch_state_metrics(&self) {
        if self.state_watcher.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut states = self.connection.watch_state();
        CONNECTION_STATE.set(state_gauge(*states.borrow()));
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                CONNECTION_STATE.set(state_gauge(state));
                if state == ConnectionState::Closed {
                    break;
                }
            }
        });
    }
}

fn state_gauge(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Closing => 3.0,
        ConnectionState::Closed => 4.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use designer_bus::InMemoryBroker;

    #[test]
    fn test_state_gauge_values() {
        assert_eq!(state_gauge(ConnectionState::Disconnected), 0.0);
        assert_eq!(state_gauge(ConnectionState::Connected), 2.0);
        assert_eq!(state_gauge(ConnectionState::Closed), 4.0);
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let broker = InMemoryBroker::new();
        let config = DesignerConfig {
            log_capacity: 0,
            ..DesignerConfig::default()
        };
        let result = DesignerSession::new(config, Arc::new(broker.connector()));
        assert!(matches!(result, Err(DesignerError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_starts_log_stream() {
        let broker = InMemoryBroker::new();
        let session = DesignerSession::new(DesignerConfig::default(), Arc::new(broker.connector())).unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.filter(), LevelFilter::Only(designer_types::LogLevel::Info));

        session.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(session.log_stream().is_running());
        assert_eq!(broker.interest("workflow.logs.stream"), 1);

        // Connecting again does not add a second consumer.
        session.connect().await.unwrap();
        assert_eq!(broker.interest("workflow.logs.stream"), 1);

        session.shutdown().await;
        assert_eq!(session.state(), ConnectionState::Closed);
        assert_eq!(broker.subscriber_count(), 0);
    }
}
