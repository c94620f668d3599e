use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::job::Job;

#[derive(Debug, Error)]
#[error("the subscription has been closed")]
pub struct SubscriptionClosed;

/// Receiving half of one (connector, queue) job stream. Created by a
/// connector's `subscribe` and consumed by the runtime's fanout.
pub struct Subscription {
    queue: String,
    jobs: mpsc::Receiver<Job>,
    stop: Arc<watch::Sender<bool>>,
    stopped: watch::Receiver<bool>,
}

/// Producing half, held by the connector's poll task.
pub struct SubscriptionSender {
    jobs: mpsc::Sender<Job>,
    stopped: watch::Receiver<bool>,
}

/// Cheap handle that can close a subscription from anywhere, e.g. a shutdown
/// callback.
#[derive(Clone)]
pub struct Unsubscriber(Arc<watch::Sender<bool>>);

impl Subscription {
    /// Create the two halves of a subscription. `buffer` bounds how many
    /// undelivered jobs the stream will hold.
    pub fn channel(queue: impl Into<String>, buffer: usize) -> (SubscriptionSender, Subscription) {
        let (jobs_tx, jobs_rx) = mpsc::channel(buffer);
        let (stop_tx, stop_rx) = watch::channel(false);

        let sender = SubscriptionSender {
            jobs: jobs_tx,
            stopped: stop_rx.clone(),
        };
        let subscription = Subscription {
            queue: queue.into(),
            jobs: jobs_rx,
            stop: Arc::new(stop_tx),
            stopped: stop_rx,
        };

        (sender, subscription)
    }

    pub fn queue(&self) -> &str {
        self.queue.as_str()
    }

    /// The next job in the stream. Jobs already buffered drain out even after
    /// an unsubscribe; `None` means the stream is closed.
    pub async fn next(&mut self) -> Option<Job> {
        if !*self.stopped.borrow() {
            tokio::select! {
                biased;

                job = self.jobs.recv() => return job,
                _ = self.stopped.changed() => {}
            };
        }

        // Unsubscribed. Hand out whatever is already buffered, then report
        // the stream as closed without waiting on the producer.
        self.jobs.recv().now_or_never().flatten()
    }

    /// Close the stream. Idempotent; jobs already buffered are still
    /// delivered by `next` before it reports the closed state.
    pub fn unsubscribe(&self) {
        self.stop.send(true).ok();
    }

    pub fn unsubscriber(&self) -> Unsubscriber {
        Unsubscriber(self.stop.clone())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("queue", &self.queue)
            .field("stopped", &*self.stopped.borrow())
            .finish()
    }
}

impl SubscriptionSender {
    /// Send a job downstream. Fails once the subscription has been closed, so
    /// a producer loop can use the result to decide when to stop polling.
    pub async fn send(&self, job: Job) -> Result<(), SubscriptionClosed> {
        if *self.stopped.borrow() {
            return Err(SubscriptionClosed);
        }

        self.jobs.send(job).await.map_err(|_| SubscriptionClosed)
    }

    pub fn is_closed(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Wait until the subscription is closed from the receiving side. Useful
    /// in `select!` against a backend poll timer.
    pub async fn closed(&mut self) {
        while !*self.stopped.borrow() {
            if self.stopped.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Unsubscriber {
    pub fn unsubscribe(&self) {
        self.0.send(true).ok();
    }
}
