//! Ports Layer
//!
//! - Driving Ports (inbound): API for the UI collaborator
//! - Driven Ports (outbound): where recovered errors are reported

pub mod inbound;
pub mod outbound;

pub use inbound::{DesignerApi, LogBatch, LogViewApi};
pub use outbound::{CollectingErrorSink, ErrorSink, TracingErrorSink};
