use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fxhash::FxHashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::connector::{Connector, ConnectorError};

/// User-visible body of a job. Which fields carry meaning is up to the
/// connector; the runtime only moves the payload around.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub content: String,
    pub class: Option<String>,
    pub args: SmallVec<[String; 4]>,
    pub delay_seconds: Option<u32>,
    pub metadata: FxHashMap<String, String>,
}

impl Payload {
    pub fn from_content(content: impl Into<String>) -> Payload {
        Payload {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn from_json<T: Serialize>(value: &T) -> Result<Payload, serde_json::Error> {
        Ok(Payload {
            content: serde_json::to_string(value)?,
            ..Default::default()
        })
    }

    /// Parse `content` as JSON.
    pub fn json_content<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.content.as_str())
    }
}

/// One message delivered by a subscription. Cheap to clone; every clone
/// shares the finished flag and the reference to the originating connector.
pub struct Job(Arc<JobInner>);

struct JobInner {
    id: Uuid,
    queue: String,
    payload: Payload,
    connector: Arc<dyn Connector>,
    finished: AtomicBool,
}

impl Job {
    pub fn new(connector: Arc<dyn Connector>, queue: impl Into<String>, payload: Payload) -> Job {
        Job(Arc::new(JobInner {
            id: Uuid::new_v4(),
            queue: queue.into(),
            payload,
            connector,
            finished: AtomicBool::new(false),
        }))
    }

    /// Runtime-assigned id for this delivery. A redelivered message gets a
    /// fresh id.
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn queue(&self) -> &str {
        self.0.queue.as_str()
    }

    pub fn payload(&self) -> &Payload {
        &self.0.payload
    }

    /// The connector that produced this job, and the one that must
    /// acknowledge it.
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.0.connector
    }

    /// Whether the job has reached a terminal acknowledged state. The flag
    /// transitions false to true at most once.
    pub fn is_finished(&self) -> bool {
        self.0.finished.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.0.finished.store(true, Ordering::SeqCst);
    }

    /// Acknowledge this job on its originating connector. A no-op once the
    /// job is finished.
    pub async fn complete(&self) -> Result<(), ConnectorError> {
        if self.is_finished() {
            return Ok(());
        }

        self.0.connector.complete_job(self).await?;
        self.finish();
        Ok(())
    }

    /// Negatively acknowledge this job on its originating connector. A no-op
    /// once the job is finished.
    pub async fn fail(&self) -> Result<(), ConnectorError> {
        if self.is_finished() {
            return Ok(());
        }

        self.0.connector.fail_job(self).await?;
        self.finish();
        Ok(())
    }
}

impl Clone for Job {
    fn clone(&self) -> Job {
        Job(self.0.clone())
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.0.id)
            .field("queue", &self.0.queue)
            .field("payload", &self.0.payload)
            .field("finished", &self.is_finished())
            .finish()
    }
}
