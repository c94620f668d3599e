use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fxhash::FxHashMap;

use crate::job::Job;

/// User-provided processing for one queue. An error return fails the job on
/// its originating connector; success completes it. The runtime never
/// cancels a running handler; long handlers should rely on the heartbeat to
/// keep their backend lease alive.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn work(&self, job: &Job) -> Result<(), anyhow::Error>;
}

/// Adapter so plain async closures can be registered as handlers.
pub(crate) struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
{
    async fn work(&self, job: &Job) -> Result<(), anyhow::Error> {
        (self.0)(job.clone()).await
    }
}

/// Queue name to handler. Lookups on the dispatch path take the same lock as
/// registration, so handlers may be installed or replaced while the worker
/// runs.
pub(crate) struct HandlerRegistry {
    handlers: Mutex<FxHashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry {
            handlers: Mutex::new(FxHashMap::default()),
        }
    }

    /// Install or replace the handler for `queue`. Returns false when the
    /// queue name is rejected.
    pub fn set(&self, queue: &str, handler: Arc<dyn Handler>) -> bool {
        if queue.is_empty() {
            return false;
        }

        self.handlers
            .lock()
            .unwrap()
            .insert(queue.to_string(), handler);
        true
    }

    pub fn get(&self, queue: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.lock().unwrap().get(queue).cloned()
    }
}
