use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobworker::{
    BatchEntry, BatchOutput, Connector, ConnectorError, Job, Payload, Subscription,
};

/// In-memory connector for the end-to-end tests. Jobs staged with `deliver`
/// come out of the next subscription for their queue; the stream then stays
/// open until unsubscribed, like a backend with nothing more to deliver yet.
/// Enqueue and batch results can be scripted per call; once a script runs
/// out, calls succeed.
pub struct TestConnector {
    name: String,
    deliveries: Mutex<Vec<(String, Payload)>>,
    enqueued: Mutex<Vec<(String, Payload)>>,
    enqueue_results: Mutex<VecDeque<Result<(), ConnectorError>>>,
    batch_results: Mutex<VecDeque<Result<BatchOutput, ConnectorError>>>,
    batch_calls: Mutex<Vec<Vec<String>>>,
    completed: Mutex<Vec<String>>,
    failed: Mutex<Vec<String>>,
}

impl TestConnector {
    pub fn new(name: &str) -> Arc<TestConnector> {
        Arc::new(TestConnector {
            name: name.to_string(),
            deliveries: Mutex::new(Vec::new()),
            enqueued: Mutex::new(Vec::new()),
            enqueue_results: Mutex::new(VecDeque::new()),
            batch_results: Mutex::new(VecDeque::new()),
            batch_calls: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        })
    }

    /// Stage a job for the next subscription on `queue`.
    pub fn deliver(&self, queue: &str, payload: Payload) {
        self.deliveries
            .lock()
            .unwrap()
            .push((queue.to_string(), payload));
    }

    pub fn script_enqueue(&self, result: Result<(), ConnectorError>) {
        self.enqueue_results.lock().unwrap().push_back(result);
    }

    pub fn script_batch(&self, result: Result<BatchOutput, ConnectorError>) {
        self.batch_results.lock().unwrap().push_back(result);
    }

    pub fn enqueued_len(&self) -> usize {
        self.enqueued.lock().unwrap().len()
    }

    pub fn batch_calls(&self) -> Vec<Vec<String>> {
        self.batch_calls.lock().unwrap().clone()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.lock().unwrap().len()
    }

    pub fn failed_len(&self) -> usize {
        self.failed.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for TestConnector {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    async fn enqueue(&self, queue: &str, payload: &Payload) -> Result<(), ConnectorError> {
        let result = self
            .enqueue_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if result.is_ok() {
            self.enqueued
                .lock()
                .unwrap()
                .push((queue.to_string(), payload.clone()));
        }
        result
    }

    async fn enqueue_batch(
        &self,
        _queue: &str,
        entries: &[BatchEntry],
    ) -> Result<BatchOutput, ConnectorError> {
        let mut ids = entries.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
        ids.sort();
        self.batch_calls.lock().unwrap().push(ids.clone());

        self.batch_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(BatchOutput {
                successful: ids,
                failed: Vec::new(),
            }))
    }

    async fn subscribe(
        self: Arc<Self>,
        queue: String,
        _poll_interval: Duration,
    ) -> Result<Subscription, ConnectorError> {
        let (mut sender, subscription) = Subscription::channel(queue.clone(), 8);

        let staged = {
            let mut deliveries = self.deliveries.lock().unwrap();
            let taken = deliveries.drain(..).collect::<Vec<_>>();
            let mut matching = Vec::new();
            for (q, payload) in taken {
                if q == queue {
                    matching.push(payload);
                } else {
                    deliveries.push((q, payload));
                }
            }
            matching
        };

        let connector: Arc<dyn Connector> = self.clone();
        let job_queue = queue;
        tokio::spawn(async move {
            for payload in staged {
                let job = Job::new(connector.clone(), job_queue.clone(), payload);
                if sender.send(job).await.is_err() {
                    return;
                }
            }
            sender.closed().await;
        });

        Ok(subscription)
    }

    async fn complete_job(&self, job: &Job) -> Result<(), ConnectorError> {
        self.completed.lock().unwrap().push(job.queue().to_string());
        Ok(())
    }

    async fn fail_job(&self, job: &Job) -> Result<(), ConnectorError> {
        self.failed.lock().unwrap().push(job.queue().to_string());
        Ok(())
    }
}
