use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{event, Level};

use crate::active_jobs::ActiveJobs;
use crate::handler::HandlerRegistry;
use crate::job::Job;
use crate::provider::ConnectorProvider;

/// Shared context each pool member dispatches with.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub handlers: Arc<HandlerRegistry>,
    pub provider: Arc<ConnectorProvider>,
    pub active: Arc<ActiveJobs>,
}

impl Dispatcher {
    /// Run one job to its terminal state. The active set is decremented
    /// exactly once, whichever path the job takes.
    async fn dispatch(&self, job: Job) {
        match self.handlers.get(job.queue()) {
            Some(handler) => match handler.work(&job).await {
                Ok(()) => {
                    if let Err(e) = job.complete().await {
                        event!(
                            Level::WARN,
                            connector = %job.connector().name(),
                            job = %job.id(),
                            error = %e,
                            "Could not complete job"
                        );
                        self.provider.mark_dead(job.connector().name());
                    }
                }
                Err(e) => {
                    event!(
                        Level::ERROR,
                        queue = %job.queue(),
                        job = %job.id(),
                        error = %e,
                        "Handler error"
                    );
                    if let Err(e) = job.fail().await {
                        event!(
                            Level::WARN,
                            connector = %job.connector().name(),
                            job = %job.id(),
                            error = %e,
                            "Could not fail job"
                        );
                        self.provider.mark_dead(job.connector().name());
                    }
                }
            },
            None => {
                // No ack either way; the backend redelivers once its
                // visibility timeout lapses.
                event!(
                    Level::WARN,
                    queue = %job.queue(),
                    job = %job.id(),
                    "No handler registered for queue, dropping job"
                );
            }
        };

        self.active.remove(&job);
    }
}

/// Spawn `concurrency` peer tasks that drain the work channel until it is
/// closed and empty.
pub(crate) fn start_workers(
    concurrency: usize,
    work_rx: mpsc::Receiver<Job>,
    dispatcher: Dispatcher,
) -> Vec<JoinHandle<()>> {
    let work_rx = Arc::new(Mutex::new(work_rx));

    (0..concurrency)
        .map(|_| {
            let work_rx = work_rx.clone();
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                loop {
                    let job = work_rx.lock().await.recv().await;
                    match job {
                        Some(job) => dispatcher.dispatch(job).await,
                        None => break,
                    }
                }
            })
        })
        .collect()
}
