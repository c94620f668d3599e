use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fxhash::FxHashMap;
use smallvec::SmallVec;
use tokio::time::Instant;
use tracing::{event, Level};

use crate::connector::{BatchEntry, Connector, ConnectorError};
use crate::error::Error;
use crate::job::Payload;

/// How long a connector stays excluded from failover after a failed
/// operation, unless overridden.
pub const DEFAULT_DEAD_RETRY: Duration = Duration::from_secs(10);

/// Connectors keyed by priority, with transient liveness tracking. Smaller
/// priority numbers win. All methods are safe to call concurrently.
pub struct ConnectorProvider {
    inner: Mutex<ProviderInner>,
}

struct ProviderInner {
    connectors: BTreeMap<u32, Arc<dyn Connector>>,
    dead: FxHashMap<String, Instant>,
    dead_retry: Duration,
}

impl ConnectorProvider {
    pub fn new() -> ConnectorProvider {
        ConnectorProvider {
            inner: Mutex::new(ProviderInner {
                connectors: BTreeMap::new(),
                dead: FxHashMap::default(),
                dead_retry: DEFAULT_DEAD_RETRY,
            }),
        }
    }

    /// Record `connector` at `priority`, replacing any connector already held
    /// there.
    pub fn register(&self, priority: u32, connector: Arc<dyn Connector>) {
        self.inner
            .lock()
            .unwrap()
            .connectors
            .insert(priority, connector);
    }

    pub fn set_dead_retry(&self, interval: Duration) {
        self.inner.lock().unwrap().dead_retry = interval;
    }

    /// Stable ascending-priority snapshot of the registered connectors.
    pub fn connectors_in_priority_order(&self) -> SmallVec<[Arc<dyn Connector>; 2]> {
        self.inner
            .lock()
            .unwrap()
            .connectors
            .values()
            .cloned()
            .collect()
    }

    /// Whether `name` is currently excluded from failover. Revival is lazy:
    /// the entry simply stops counting once the retry interval has elapsed.
    pub fn is_dead(&self, name: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .dead
            .get(name)
            .map(|marked_at| marked_at.elapsed() < inner.dead_retry)
            .unwrap_or(false)
    }

    /// Exclude `name` from failover for the retry interval. Re-marking
    /// refreshes the timestamp.
    pub fn mark_dead(&self, name: &str) {
        event!(Level::WARN, connector = %name, "Marking connector dead");
        self.inner
            .lock()
            .unwrap()
            .dead
            .insert(name.to_string(), Instant::now());
    }

    /// Try each live connector in priority order until one accepts the job.
    /// A duplication report from the backend counts as accepted; any other
    /// error marks the connector dead and moves on to the next one.
    pub async fn enqueue(&self, queue: &str, payload: &Payload) -> Result<(), Error> {
        for connector in self.connectors_in_priority_order() {
            if self.is_dead(connector.name()) {
                continue;
            }

            match connector.enqueue(queue, payload).await {
                Ok(()) => return Ok(()),
                Err(ConnectorError::DuplicationDetected) => {
                    event!(
                        Level::DEBUG,
                        connector = %connector.name(),
                        queue = %queue,
                        "Backend reported a duplicate, treating the job as enqueued"
                    );
                    return Ok(());
                }
                Err(e) => {
                    event!(
                        Level::WARN,
                        connector = %connector.name(),
                        queue = %queue,
                        error = %e,
                        "Enqueue failed, trying the next connector"
                    );
                    self.mark_dead(connector.name());
                }
            }
        }

        Err(Error::AllConnectorsFailed)
    }

    /// Batch counterpart of [enqueue](Self::enqueue). Ids delivered by one
    /// connector are dropped from the attempt against the next, so each retry
    /// carries only the remaining work.
    pub async fn enqueue_batch(
        &self,
        queue: &str,
        entries: FxHashMap<String, Payload>,
    ) -> Result<(), Error> {
        let mut remaining = entries;
        if remaining.is_empty() {
            return Ok(());
        }

        for connector in self.connectors_in_priority_order() {
            if self.is_dead(connector.name()) {
                continue;
            }

            let batch = remaining
                .iter()
                .map(|(id, payload)| BatchEntry {
                    id: id.clone(),
                    payload: payload.clone(),
                })
                .collect::<Vec<_>>();

            match connector.enqueue_batch(queue, batch.as_slice()).await {
                Ok(output) if output.failed.is_empty() => return Ok(()),
                Ok(output) => {
                    event!(
                        Level::WARN,
                        connector = %connector.name(),
                        queue = %queue,
                        delivered = output.successful.len(),
                        failed = output.failed.len(),
                        "Batch partially enqueued, trying the next connector"
                    );
                    for id in &output.successful {
                        remaining.remove(id);
                    }
                    self.mark_dead(connector.name());
                }
                Err(e) => {
                    event!(
                        Level::WARN,
                        connector = %connector.name(),
                        queue = %queue,
                        error = %e,
                        "Batch enqueue failed, trying the next connector"
                    );
                    self.mark_dead(connector.name());
                }
            }
        }

        Err(Error::BatchRemainder {
            remaining: remaining.keys().cloned().collect(),
        })
    }
}

impl Default for ConnectorProvider {
    fn default() -> ConnectorProvider {
        ConnectorProvider::new()
    }
}
