//! Outbound Ports (Driven Ports)
//!
//! Where the core reports problems it recovers from locally.

use std::sync::atomic::{AtomicU64, Ordering};

use designer_telemetry::log_event;
use designer_types::DecodeError;
use parking_lot::Mutex;

/// Receives log stream messages that could not be decoded.
///
/// The stream drops the message and keeps going; the sink makes the drop
/// observable.
pub trait ErrorSink: Send + Sync {
    fn report(&self, subject: &str, error: &DecodeError);
}

/// Logs each drop at WARN and counts it.
#[derive(Debug, Default)]
pub struct TracingErrorSink {
    reported: AtomicU64,
}

impl TracingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }
}

impl ErrorSink for TracingErrorSink {
    fn report(&self, subject: &str, error: &DecodeError) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        log_event!(
            warn,
            "log_stream",
            "Dropped undecodable message",
            subject = subject,
            error = %error
        );
    }
}

/// Keeps every reported error, for tests and UI banners.
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    errors: Mutex<Vec<(String, DecodeError)>>,
}

impl CollectingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    /// Remove and return everything collected so far.
    pub fn take(&self) -> Vec<(String, DecodeError)> {
        std::mem::take(&mut *self.errors.lock())
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, subject: &str, error: &DecodeError) {
        self.errors.lock().push((subject.to_string(), error.clone()));
    }
}
