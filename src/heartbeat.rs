use std::sync::Arc;
use std::time::Duration;

use jobworker_graceful_shutdown::GracefulShutdownConsumer;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{event, Level};

use crate::active_jobs::ActiveJobs;
use crate::job::Job;

/// Callback invoked for every active job on each heartbeat cycle, so long
/// handlers can extend their backend visibility lease.
pub type HeartbeatFn = Arc<dyn Fn(Job) + Send + Sync>;

/// Run the heartbeat until shutdown or until the closer is dropped. Each
/// cycle snapshots the active set and invokes the callback from a detached
/// task; a slow callback never stalls the cadence or the active-set lock.
pub(crate) fn start_heartbeat(
    interval: Duration,
    on_heartbeat: HeartbeatFn,
    active: Arc<ActiveJobs>,
    mut shutdown: GracefulShutdownConsumer,
    closer_rx: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    event!(Level::INFO, interval = ?interval, "Starting heartbeat");

    tokio::spawn(async move {
        let shutdown_fut = shutdown.wait_for_shutdown();
        tokio::pin!(shutdown_fut);
        tokio::pin!(closer_rx);

        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_fut => break,
                _ = &mut closer_rx => break,
                _ = ticker.tick() => {}
            };

            let jobs = active.snapshot();
            if jobs.is_empty() {
                continue;
            }

            event!(Level::DEBUG, count = jobs.len(), "Heartbeat");

            let on_heartbeat = on_heartbeat.clone();
            tokio::spawn(async move {
                for job in jobs {
                    on_heartbeat(job);
                }
            });
        }
    })
}
