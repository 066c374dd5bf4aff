//! Designer Service
//!
//! Implements `DesignerApi`: parsing and serialization are local, validation
//! is a request/reply round trip to the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use designer_bus::{BusError, Correlator};
use designer_telemetry::{metric_inc, time_histogram, VALIDATION_DURATION, VALIDATION_REQUESTS};
use designer_types::{DagSpec, ValidateDagRequest, ValidationReply};
use tracing::{debug, info, warn};

use crate::domain::transcoder;
use crate::error::{DesignerError, ParseError};
use crate::ports::DesignerApi;

pub struct DesignerService {
    correlator: Arc<Correlator>,
    validate_subject: String,
    timeout: Duration,
}

impl DesignerService {
    pub fn new(correlator: Arc<Correlator>, validate_subject: impl Into<String>, timeout: Duration) -> Self {
        Self {
            correlator,
            validate_subject: validate_subject.into(),
            timeout,
        }
    }

    /// Parse `text`, then validate the result.
    ///
    /// Returns the parsed spec alongside the verdict so the caller can keep
    /// editing it either way.
    pub async fn parse_and_validate(
        &self,
        text: &str,
    ) -> Result<(DagSpec, ValidationReply), DesignerError> {
        let spec = self.parse(text)?;
        let reply = self.validate(&spec).await?;
        Ok((spec, reply))
    }

    /// YAML rendering of a spec.
    pub fn to_yaml(&self, spec: &DagSpec) -> Result<String, ParseError> {
        transcoder::to_yaml(spec)
    }

    #[must_use]
    pub fn validate_subject(&self) -> &str {
        &self.validate_subject
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }
}

#[async_trait]
impl DesignerApi for DesignerService {
    fn parse(&self, text: &str) -> Result<DagSpec, ParseError> {
        let spec = transcoder::parse(text)?;
        debug!(dag = %spec.name, tasks = spec.task_count(), "Parsed DAG spec");
        Ok(spec)
    }

    fn serialize(&self, spec: &DagSpec) -> Result<Vec<u8>, ParseError> {
        transcoder::serialize(spec)
    }

    async fn validate(&self, spec: &DagSpec) -> Result<ValidationReply, DesignerError> {
        transcoder::check_spec(spec)?;

        let _timer = time_histogram!(VALIDATION_DURATION);
        let result = self
            .correlator
            .request_json::<_, ValidationReply, _>(&self.validate_subject, Some(self.timeout), |inbox| {
                ValidateDagRequest::new(spec.clone(), inbox)
            })
            .await;

        match result {
            Ok(reply) => {
                if reply.valid {
                    metric_inc!(VALIDATION_REQUESTS, &["valid"]);
                    info!(dag = %spec.name, "DAG validated");
                } else {
                    metric_inc!(VALIDATION_REQUESTS, &["invalid"]);
                    info!(dag = %spec.name, errors = reply.errors.len(), "DAG rejected by orchestrator");
                }
                Ok(reply)
            }
            Err(e) => {
                let outcome = match &e {
                    BusError::Timeout { .. } => "timeout",
                    BusError::Decode(_) => "bad_reply",
                    _ => "error",
                };
                metric_inc!(VALIDATION_REQUESTS, &[outcome]);
                warn!(dag = %spec.name, error = %e, "DAG validation failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use designer_bus::{Connection, InMemoryBroker};
    use designer_types::VALIDATE_SUBJECT;
    use serde_json::json;

    async fn service(broker: &InMemoryBroker, timeout: Duration) -> DesignerService {
        let conn = Connection::new("memory://designer", Arc::new(broker.connector()));
        conn.connect().await.unwrap();
        let correlator = Arc::new(Correlator::new(conn, "designer.inbox", timeout));
        DesignerService::new(correlator, VALIDATE_SUBJECT, timeout)
    }

    /// Orchestrator stand-in: rejects DAGs with no tasks.
    async fn orchestrator(broker: &InMemoryBroker) {
        let conn = Connection::new("memory://orchestrator", Arc::new(broker.connector()));
        conn.connect().await.unwrap();
        let mut requests = conn.subscribe(VALIDATE_SUBJECT).await.unwrap();
        tokio::spawn(async move {
            while let Some(msg) = requests.recv().await {
                let request: ValidateDagRequest = serde_json::from_slice(&msg.payload).unwrap();
                let reply = if request.dag.tasks.is_empty() {
                    ValidationReply::invalid(vec!["DAG has no tasks".into()])
                } else {
                    ValidationReply::valid()
                };
                conn.publish(&request.reply_to, serde_json::to_vec(&reply).unwrap())
                    .await
                    .unwrap();
            }
        });
    }

    #[tokio::test]
    async fn test_validate_valid_and_invalid() {
        let broker = InMemoryBroker::new();
        orchestrator(&broker).await;
        let service = service(&broker, Duration::from_secs(1)).await;

        let ok = service
            .validate(&DagSpec::new("a", vec![json!({"id": "t"})]))
            .await
            .unwrap();
        assert!(ok.valid);

        let rejected = service.validate(&DagSpec::new("b", vec![])).await.unwrap();
        assert!(!rejected.valid);
        assert_eq!(rejected.errors, vec!["DAG has no tasks"]);
    }

    #[tokio::test]
    async fn test_parse_and_validate() {
        let broker = InMemoryBroker::new();
        orchestrator(&broker).await;
        let service = service(&broker, Duration::from_secs(1)).await;

        let (spec, reply) = service
            .parse_and_validate("name: etl\ntasks:\n  - id: extract\n")
            .await
            .unwrap();
        assert_eq!(spec.name, "etl");
        assert!(reply.valid);

        let err = service.parse_and_validate("tasks: []").await.unwrap_err();
        assert_eq!(err, DesignerError::Parse(ParseError::MissingField("name")));
    }

    #[tokio::test]
    async fn test_validate_times_out_without_orchestrator() {
        let broker = InMemoryBroker::new();
        let service = service(&broker, Duration::from_millis(20)).await;

        let err = service.validate(&DagSpec::new("a", vec![])).await.unwrap_err();
        assert!(matches!(err, DesignerError::Bus(BusError::Timeout { .. })));
        assert_eq!(service.correlator().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_validate_rejects_invalid_spec_locally() {
        let broker = InMemoryBroker::new();
        let service = service(&broker, Duration::from_millis(20)).await;

        let err = service.validate(&DagSpec::new("", vec![])).await.unwrap_err();
        assert_eq!(err, DesignerError::Parse(ParseError::EmptyName));
        assert_eq!(broker.messages_published(), 0);
    }

    #[test]
    fn test_serialize_matches_transcoder() {
        let spec = DagSpec::new("a", vec![json!(1)]);
        let bytes = transcoder::serialize(&spec).unwrap();
        assert_eq!(serde_json::from_slice::<DagSpec>(&bytes).unwrap(), spec);
    }
}
