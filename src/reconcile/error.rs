//! Reconciliation errors.

use thiserror::Error;

use crate::models::ContentIssue;
use crate::repository::StoreError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid toc content from {link}: {issue}")]
    InvalidContent { link: String, issue: ContentIssue },

    #[error("medium {0} does not exist")]
    MediumNotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}
