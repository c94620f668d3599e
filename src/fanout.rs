use std::sync::Arc;
use std::time::Duration;

use fxhash::FxHashMap;
use jobworker_graceful_shutdown::GracefulShutdown;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{event, Level};

use crate::active_jobs::ActiveJobs;
use crate::job::Job;
use crate::provider::ConnectorProvider;

/// Open one subscription per (connector, queue) pair and forward every job
/// into the shared work channel. The caller drops its own sender clone after
/// this returns, so the channel closes once the last forwarder exits.
pub(crate) async fn start_forwarders(
    provider: &ConnectorProvider,
    poll_intervals: &FxHashMap<String, Duration>,
    active: Arc<ActiveJobs>,
    shutdown: &GracefulShutdown,
    work_tx: mpsc::Sender<Job>,
) -> Vec<JoinHandle<()>> {
    let mut forwarders = Vec::new();

    for connector in provider.connectors_in_priority_order() {
        for (queue, poll_interval) in poll_intervals {
            let subscription = connector
                .clone()
                .subscribe(queue.clone(), *poll_interval)
                .await;
            let mut subscription = match subscription {
                Ok(subscription) => subscription,
                Err(e) => {
                    event!(
                        Level::ERROR,
                        connector = %connector.name(),
                        queue = %queue,
                        error = %e,
                        "Could not subscribe"
                    );
                    provider.mark_dead(connector.name());
                    continue;
                }
            };

            event!(Level::INFO, connector = %connector.name(), queue = %queue, "Subscribed");

            // Shutdown reaches the forwarder through the stream closing, not
            // through a flag it has to poll.
            let unsubscriber = subscription.unsubscriber();
            shutdown.on_shutdown(move || unsubscriber.unsubscribe());

            let active = active.clone();
            let work_tx = work_tx.clone();
            forwarders.push(tokio::spawn(async move {
                while let Some(job) = subscription.next().await {
                    // The job counts as active from the moment of pickup,
                    // before it enters the work channel.
                    active.insert(job.clone());
                    if let Err(send_error) = work_tx.send(job).await {
                        active.remove(&send_error.0);
                        break;
                    }
                }
            }));
        }
    }

    forwarders
}
