//! Backend-agnostic job worker runtime. Connectors adapt queue backends to
//! one contract; the worker polls their subscriptions, dispatches each job to
//! the handler registered for its queue, and acknowledges the job on the
//! connector that produced it. Enqueues fail over across connectors in
//! priority order, with transient liveness tracking for backends that error.

pub mod connector;
pub mod error;
pub mod job;
pub mod provider;
pub mod subscription;

mod active_jobs;
mod fanout;
mod handler;
mod heartbeat;
#[cfg(test)]
mod test_support;
mod worker_pool;

pub use self::{
    connector::{BatchEntry, BatchOutput, Connector, ConnectorError},
    error::Error,
    handler::Handler,
    heartbeat::HeartbeatFn,
    job::{Job, Payload},
    provider::ConnectorProvider,
    subscription::{Subscription, SubscriptionClosed, SubscriptionSender, Unsubscriber},
};
pub use jobworker_graceful_shutdown::{GracefulShutdown, GracefulShutdownConsumer};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fxhash::FxHashMap;
use futures::future::join_all;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{event, Level};

use self::active_jobs::ActiveJobs;
use self::handler::{FnHandler, HandlerRegistry};
use self::worker_pool::Dispatcher;

/// Construction settings for [JobWorker].
#[derive(Clone, Default)]
pub struct WorkerConfig {
    /// The connector tried first for enqueues and polled for jobs. Required.
    pub primary: Option<Arc<dyn Connector>>,
    /// Fallback connector, registered at the next priority.
    pub secondary: Option<Arc<dyn Connector>>,
    /// How long a failed connector stays excluded from failover.
    pub dead_connector_retry: Option<Duration>,
}

/// Settings for one [work](JobWorker::work) run.
#[derive(Clone, Default)]
pub struct WorkConfig {
    /// Queue name to backend polling interval. At least one entry is
    /// required.
    pub poll_intervals: FxHashMap<String, Duration>,
    /// Number of concurrent dispatchers. Zero means one.
    pub worker_concurrency: usize,
    pub heartbeat_interval: Option<Duration>,
    pub on_heartbeat: Option<HeartbeatFn>,
}

/// The facade over the whole runtime: connector registry, handler registry,
/// the run loop, and shutdown. Clones share one underlying worker.
pub struct JobWorker(Arc<WorkerInner>);

impl std::fmt::Debug for JobWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWorker").finish()
    }
}

struct WorkerInner {
    provider: Arc<ConnectorProvider>,
    handlers: Arc<HandlerRegistry>,
    active: Arc<ActiveJobs>,
    shutdown: GracefulShutdown,
    started: AtomicBool,
    in_shutdown: AtomicBool,
    heartbeat_task: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl JobWorker {
    pub fn new(config: WorkerConfig) -> Result<JobWorker, Error> {
        let primary = config.primary.ok_or(Error::PrimaryConnectorRequired)?;

        let provider = ConnectorProvider::new();
        if let Some(interval) = config.dead_connector_retry {
            provider.set_dead_retry(interval);
        }

        provider.register(1, primary);
        if let Some(secondary) = config.secondary {
            provider.register(2, secondary);
        }

        Ok(JobWorker(Arc::new(WorkerInner {
            provider: Arc::new(provider),
            handlers: Arc::new(HandlerRegistry::new()),
            active: Arc::new(ActiveJobs::new()),
            shutdown: GracefulShutdown::new(),
            started: AtomicBool::new(false),
            in_shutdown: AtomicBool::new(false),
            heartbeat_task: Mutex::new(None),
        })))
    }

    pub fn connector_provider(&self) -> &ConnectorProvider {
        &self.0.provider
    }

    /// Enqueue one job, failing over across connectors in priority order.
    pub async fn enqueue_job(&self, queue: &str, payload: &Payload) -> Result<(), Error> {
        self.0.provider.enqueue(queue, payload).await
    }

    /// Enqueue a batch keyed by caller-assigned ids, failing over with only
    /// the undelivered remainder.
    pub async fn enqueue_job_batch(
        &self,
        queue: &str,
        entries: FxHashMap<String, Payload>,
    ) -> Result<(), Error> {
        self.0.provider.enqueue_batch(queue, entries).await
    }

    /// Install or replace the handler for `queue`. Returns false when the
    /// queue name is rejected.
    pub fn register(&self, queue: &str, handler: Arc<dyn Handler>) -> bool {
        self.0.handlers.set(queue, handler)
    }

    /// [register](Self::register) for plain async closures.
    pub fn register_func<F, Fut>(&self, queue: &str, f: F) -> bool
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.0.handlers.set(queue, Arc::new(FnHandler(f)))
    }

    /// Register a callback to run in its own detached task when shutdown
    /// begins. Callbacks registered after shutdown has started run
    /// immediately.
    pub fn register_on_shutdown<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.0.shutdown.on_shutdown(move || {
            tokio::spawn(async move { f() });
        });
    }

    pub fn started(&self) -> bool {
        self.0.started.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.0.in_shutdown.load(Ordering::SeqCst)
    }

    pub fn active_job_count(&self) -> usize {
        self.0.active.count()
    }

    /// Run the worker: subscribe to every configured queue on every
    /// connector, fan the streams into one work channel, and dispatch with
    /// `worker_concurrency` peers. Blocks until shutdown closes the
    /// subscriptions and the pool drains. A worker can only be started once.
    pub async fn work(&self, config: WorkConfig) -> Result<(), Error> {
        if config.poll_intervals.is_empty() {
            return Err(Error::QueueSettingsRequired);
        }

        if self
            .0
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }

        let concurrency = if config.worker_concurrency == 0 {
            1
        } else {
            config.worker_concurrency
        };

        event!(
            Level::INFO,
            concurrency,
            queues = config.poll_intervals.len(),
            "Starting job worker"
        );

        if let Some((interval, on_heartbeat)) =
            config.heartbeat_interval.zip(config.on_heartbeat)
        {
            if interval > Duration::default() {
                let (closer_tx, closer_rx) = oneshot::channel();
                let task = heartbeat::start_heartbeat(
                    interval,
                    on_heartbeat,
                    self.0.active.clone(),
                    self.0.shutdown.consumer(),
                    closer_rx,
                );
                *self.0.heartbeat_task.lock().unwrap() = Some((closer_tx, task));
            }
        }

        let (work_tx, work_rx) = mpsc::channel(1);

        let forwarders = fanout::start_forwarders(
            &self.0.provider,
            &config.poll_intervals,
            self.0.active.clone(),
            &self.0.shutdown,
            work_tx,
        )
        .await;

        let workers = worker_pool::start_workers(
            concurrency,
            work_rx,
            Dispatcher {
                handlers: self.0.handlers.clone(),
                provider: self.0.provider.clone(),
                active: self.0.active.clone(),
            },
        );

        for result in join_all(workers).await {
            if let Err(e) = result {
                event!(Level::ERROR, error = %e, "Worker task panicked");
            }
        }

        // The pool only drains after the channel closes, so the forwarders
        // have already exited.
        for result in join_all(forwarders).await {
            if let Err(e) = result {
                event!(Level::ERROR, error = %e, "Forwarder task panicked");
            }
        }

        // Dropping the closer stops the heartbeat.
        self.0.heartbeat_task.lock().unwrap().take();

        event!(Level::INFO, "Job worker finished");
        Ok(())
    }

    /// Begin shutdown and wait up to `timeout` for active jobs to drain.
    /// Every subscription is unsubscribed and every on-shutdown callback
    /// dispatched before the wait starts.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), Error> {
        self.0.in_shutdown.store(true, Ordering::SeqCst);

        event!(Level::INFO, "Shutting down job worker");
        self.0.shutdown.shutdown();

        tokio::time::timeout(timeout, self.0.active.wait_until_empty()).await?;

        event!(Level::INFO, "Job worker drained");
        Ok(())
    }
}

impl Clone for JobWorker {
    fn clone(&self) -> JobWorker {
        JobWorker(self.0.clone())
    }
}
