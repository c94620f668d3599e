use std::sync::Mutex;

use fxhash::FxHashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::job::Job;

/// Jobs currently between pickup by the fanout and terminal acknowledgement.
/// The watch channel mirrors the set size under the same lock, so snapshots,
/// counts, and the shutdown drain wait all agree.
pub(crate) struct ActiveJobs {
    jobs: Mutex<FxHashMap<Uuid, Job>>,
    count_tx: watch::Sender<usize>,
    // Held so the sender always has a receiver and updates are never lost.
    count_rx: watch::Receiver<usize>,
}

impl ActiveJobs {
    pub fn new() -> ActiveJobs {
        let (count_tx, count_rx) = watch::channel(0);
        ActiveJobs {
            jobs: Mutex::new(FxHashMap::default()),
            count_tx,
            count_rx,
        }
    }

    pub fn insert(&self, job: Job) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.insert(job.id(), job);
        self.count_tx.send(jobs.len()).ok();
    }

    pub fn remove(&self, job: &Job) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.remove(&job.id());
        self.count_tx.send(jobs.len()).ok();
    }

    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    /// Resolve once no jobs remain active.
    pub async fn wait_until_empty(&self) {
        let mut count_rx = self.count_rx.clone();
        loop {
            if *count_rx.borrow() == 0 {
                return;
            }
            if count_rx.changed().await.is_err() {
                return;
            }
        }
    }
}
