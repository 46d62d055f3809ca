//! Job handler seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::JobError;
use crate::models::{JobItem, JobRequest, JobType, ListResult, NewsResult, TocResult};

/// Result published on an event channel.
#[derive(Debug, Clone)]
pub enum ScrapeResult {
    Toc(TocResult),
    /// News and feed jobs share a shape.
    News(NewsResult),
    List(ListResult),
}

/// What a handler produced.
#[derive(Debug)]
pub enum JobOutput {
    /// Nothing to pass on.
    Done,
    /// New jobs to add to the store.
    Jobs(Vec<JobRequest>),
    /// A result for the job type's event channel.
    Event(ScrapeResult),
}

/// Executes jobs of one type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &JobItem) -> Result<JobOutput, JobError>;
}

/// Handlers by job type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(job_type, handler);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }
}
