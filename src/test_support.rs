//! Shared helpers for unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::connector::{BatchEntry, BatchOutput, Connector, ConnectorError};
use crate::job::{Job, Payload};
use crate::subscription::Subscription;

/// Connector that accepts everything and delivers nothing.
pub(crate) struct NoopConnector;

#[async_trait]
impl Connector for NoopConnector {
    fn name(&self) -> &str {
        "noop"
    }

    async fn enqueue(&self, _queue: &str, _payload: &Payload) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn enqueue_batch(
        &self,
        _queue: &str,
        entries: &[BatchEntry],
    ) -> Result<BatchOutput, ConnectorError> {
        Ok(BatchOutput {
            successful: entries.iter().map(|e| e.id.clone()).collect(),
            failed: Vec::new(),
        })
    }

    async fn subscribe(
        self: Arc<Self>,
        queue: String,
        _poll_interval: Duration,
    ) -> Result<Subscription, ConnectorError> {
        let (_sender, subscription) = Subscription::channel(queue, 1);
        Ok(subscription)
    }

    async fn complete_job(&self, _job: &Job) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn fail_job(&self, _job: &Job) -> Result<(), ConnectorError> {
        Ok(())
    }
}
