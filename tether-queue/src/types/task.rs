use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Arg, TaskId};
use crate::job::Job;

/// One link of a dispatch: a job, its arguments and an optional wake time
#[derive(Clone)]
pub struct ChainJob {
    pub job: Arc<dyn Job>,
    pub args: Vec<Arg>,
    /// Absolute time before which this link must not run; `None` runs at once
    pub delay: Option<DateTime<Utc>>,
}

impl ChainJob {
    pub fn new(job: Arc<dyn Job>, args: Vec<Arg>) -> Self {
        Self {
            job,
            args,
            delay: None,
        }
    }

    /// Set the wake time of this link
    pub fn with_delay(mut self, delay: DateTime<Utc>) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn signature(&self) -> &str {
        self.job.signature()
    }
}

impl fmt::Debug for ChainJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainJob")
            .field("signature", &self.job.signature())
            .field("args", &self.args)
            .field("delay", &self.delay)
            .finish()
    }
}

impl PartialEq for ChainJob {
    fn eq(&self, other: &Self) -> bool {
        self.job.signature() == other.job.signature()
            && self.args == other.args
            && self.delay == other.delay
    }
}

/// The full unit of work: a head job plus an ordered tail that runs only
/// after the head succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub uuid: TaskId,
    pub head: ChainJob,
    pub chain: Vec<ChainJob>,
}

impl Task {
    /// A single-job task
    pub fn new(job: Arc<dyn Job>, args: Vec<Arg>) -> Self {
        Self {
            uuid: TaskId::new(),
            head: ChainJob::new(job, args),
            chain: Vec::new(),
        }
    }

    /// A chained task; the first link becomes the head.
    ///
    /// Returns `None` for an empty chain.
    pub fn from_chain(links: Vec<ChainJob>) -> Option<Self> {
        let mut links = links.into_iter();
        let head = links.next()?;
        Some(Self {
            uuid: TaskId::new(),
            head,
            chain: links.collect(),
        })
    }

    pub fn with_delay(mut self, delay: Option<DateTime<Utc>>) -> Self {
        self.head.delay = delay;
        self
    }

    pub fn signature(&self) -> &str {
        self.head.signature()
    }

    pub fn delay(&self) -> Option<DateTime<Utc>> {
        self.head.delay
    }

    /// The task that continues this one after its head succeeded.
    ///
    /// The uuid is kept so the whole chain can be traced as one dispatch.
    pub fn next_in_chain(&self) -> Option<Task> {
        let (head, rest) = self.chain.split_first()?;
        Some(Task {
            uuid: self.uuid.clone(),
            head: head.clone(),
            chain: rest.to_vec(),
        })
    }

    /// Every link, head first
    pub fn links(&self) -> impl Iterator<Item = &ChainJob> {
        std::iter::once(&self.head).chain(self.chain.iter())
    }
}
