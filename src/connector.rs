use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::{job::Job, job::Payload, subscription::Subscription};

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The backend recognized this enqueue as a duplicate of a job it has
    /// already accepted. The failover loops treat this as success.
    #[error("the backend detected a duplicate job")]
    DuplicationDetected,

    #[error("backend error: {0}")]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for ConnectorError {
    fn from(e: anyhow::Error) -> ConnectorError {
        ConnectorError::Backend(e)
    }
}

/// One entry of a batch enqueue, keyed by a caller-assigned id.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub id: String,
    pub payload: Payload,
}

/// Per-id outcome of a batch enqueue. A backend may deliver part of a batch
/// and reject the rest in a single response.
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub successful: Vec<String>,
    pub failed: Vec<String>,
}

/// Contract each queue backend implements. Connectors are shared as
/// `Arc<dyn Connector>` and must be safe to call from any task. In-flight
/// calls are cancelled by dropping their futures.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Human-readable name, unique among the registered connectors.
    fn name(&self) -> &str;

    async fn enqueue(&self, queue: &str, payload: &Payload) -> Result<(), ConnectorError>;

    async fn enqueue_batch(
        &self,
        queue: &str,
        entries: &[BatchEntry],
    ) -> Result<BatchOutput, ConnectorError>;

    /// Open a lazy stream of jobs for `queue`, polling the backend at
    /// `poll_interval`. Jobs produced by the stream must reference this
    /// connector so the runtime can acknowledge them at their source.
    async fn subscribe(
        self: Arc<Self>,
        queue: String,
        poll_interval: Duration,
    ) -> Result<Subscription, ConnectorError>;

    async fn complete_job(&self, job: &Job) -> Result<(), ConnectorError>;

    async fn fail_job(&self, job: &Job) -> Result<(), ConnectorError>;
}
