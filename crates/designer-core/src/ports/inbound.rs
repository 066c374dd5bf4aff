//! Inbound Ports (Driving Ports)
//!
//! The API the UI collaborator drives. Every operation returns an explicit
//! success or typed error value.

use async_trait::async_trait;
use designer_types::{DagSpec, LevelFilter, LogEntry, ValidationReply};
use tokio::sync::broadcast;

use crate::error::{DesignerError, ParseError};

/// Entries appended to the log buffer in one consumer pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    /// New entries, oldest first
    pub entries: Vec<LogEntry>,
    /// Entries evicted to make room for this batch
    pub evicted: usize,
}

impl LogBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Authoring and validation of DAG specs.
#[async_trait]
pub trait DesignerApi: Send + Sync {
    /// Parse authored text into a spec.
    fn parse(&self, text: &str) -> Result<DagSpec, ParseError>;

    /// Canonical wire encoding of a spec.
    fn serialize(&self, spec: &DagSpec) -> Result<Vec<u8>, ParseError>;

    /// Ask the orchestrator to validate a spec.
    ///
    /// An orchestrator verdict of "invalid" is a successful call; errors are
    /// reserved for not getting a usable verdict at all.
    async fn validate(&self, spec: &DagSpec) -> Result<ValidationReply, DesignerError>;
}

/// Read side of the log stream.
pub trait LogViewApi: Send + Sync {
    /// Retained entries passing the current filter, oldest first.
    fn view(&self) -> Vec<LogEntry>;

    /// Every retained entry, oldest first.
    fn snapshot(&self) -> Vec<LogEntry>;

    fn filter(&self) -> LevelFilter;

    fn set_filter(&self, filter: LevelFilter);

    /// Push notifications of newly appended entries.
    fn subscribe_batches(&self) -> broadcast::Receiver<LogBatch>;
}
