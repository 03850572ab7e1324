pub mod json;

pub use json::JsonCodec;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Arg, ChainJob, JobRegistry, QueueResult, Task, TaskId};

/// Wire form of a [`Task`]: jobs are referenced by signature only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub uuid: TaskId,
    pub signature: String,
    #[serde(default)]
    pub args: Vec<Arg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DateTime<Utc>>,
    #[serde(default)]
    pub chain: Vec<LinkEnvelope>,
}

/// Wire form of a [`ChainJob`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEnvelope {
    pub signature: String,
    #[serde(default)]
    pub args: Vec<Arg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DateTime<Utc>>,
}

impl LinkEnvelope {
    fn from_link(link: &ChainJob) -> Self {
        Self {
            signature: link.signature().to_string(),
            args: link.args.clone(),
            delay: link.delay,
        }
    }

    fn into_link(self, registry: &JobRegistry) -> QueueResult<ChainJob> {
        Ok(ChainJob {
            job: registry.get(&self.signature)?,
            args: self.args,
            delay: self.delay,
        })
    }
}

impl TaskEnvelope {
    pub fn from_task(task: &Task) -> Self {
        Self {
            uuid: task.uuid.clone(),
            signature: task.signature().to_string(),
            args: task.head.args.clone(),
            delay: task.head.delay,
            chain: task.chain.iter().map(LinkEnvelope::from_link).collect(),
        }
    }

    /// Resolve every referenced signature against the registry.
    ///
    /// Fails with `JobNotFound` if any link's job is not registered.
    pub fn into_task(self, registry: &JobRegistry) -> QueueResult<Task> {
        let head = LinkEnvelope {
            signature: self.signature,
            args: self.args,
            delay: self.delay,
        }
        .into_link(registry)?;

        let chain = self
            .chain
            .into_iter()
            .map(|link| link.into_link(registry))
            .collect::<QueueResult<Vec<_>>>()?;

        Ok(Task {
            uuid: self.uuid,
            head,
            chain,
        })
    }
}
