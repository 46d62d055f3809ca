//! Scheduler and job handler errors.

use thiserror::Error;

use crate::models::JobType;
use crate::repository::StoreError;
use crate::scrapers::{ErrorKind, ScrapeError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job store error: {0}")]
    Store(#[from] StoreError),

    #[error("no handler registered for {0:?} jobs")]
    NoHandler(JobType),
}

/// Failure of a single job run.
///
/// Carries the scrape error kind when the failure came from the request
/// layer, so subscribers can tell a broken source from a flaky network.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JobError {
    pub kind: Option<ErrorKind>,
    /// Link the job was working on.
    pub url: Option<String>,
    pub message: String,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            url: None,
            message: message.into(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

impl From<ScrapeError> for JobError {
    fn from(err: ScrapeError) -> Self {
        Self {
            kind: Some(err.kind()),
            url: Some(err.request().url.clone()),
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid job arguments: {}", err))
    }
}
