//! # Designer Core
//!
//! The workflow designer's client core: everything between the UI and the bus.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): Pure logic, no I/O
//!   - `LogBuffer`: Most recent N log entries, FIFO eviction
//!   - `transcoder`: DAG text to `DagSpec` and canonical JSON back
//!
//! - **Ports Layer** (`ports/`): Trait definitions
//!   - `DesignerApi`, `LogViewApi`: Driving ports for the UI
//!   - `ErrorSink`: Driven port for recovered decode failures
//!
//! - **Service Layer** (`service/`): Orchestration
//!   - `LogStream`: Log subject consumer
//!   - `DesignerService`: Implements `DesignerApi`
//!   - `DesignerSession`: Owns the bus connection
//!
//! ## Invariants
//!
//! - The log buffer never holds more than its capacity, and holds the most
//!   recent entries in arrival order
//! - A malformed log message is reported and dropped; the stream continues
//! - `parse(serialize(x)) == x` for every structurally valid spec
//!
//! ## Usage Example
//!
//! ```ignore
//! use designer_bus::InMemoryBroker;
//! use designer_core::{DesignerApi, DesignerConfig, DesignerSession};
//! use std::sync::Arc;
//!
//! let broker = InMemoryBroker::new();
//! let session = DesignerSession::new(DesignerConfig::default(), Arc::new(broker.connector()))?;
//! session.connect().await?;
//!
//! let spec = session.designer().parse("name: etl\ntasks: []")?;
//! let verdict = session.designer().validate(&spec).await?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use config::DesignerConfig;
pub use domain::{transcoder, LogBuffer};
pub use error::{ConfigError, DesignerError, ParseError};
pub use ports::{
    CollectingErrorSink, DesignerApi, ErrorSink, LogBatch, LogViewApi, TracingErrorSink,
};
pub use service::{DesignerService, DesignerSession, LogStream};
