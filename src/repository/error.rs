//! Persistence errors.

use thiserror::Error;

use super::pool::DieselError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DieselError),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("invalid data: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}
