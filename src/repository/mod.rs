//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking on
//! SQLite. The scheduler and the reconciliation engine only see the
//! [`JobStore`] and [`ContentStore`] traits.

pub mod diesel_content;
pub mod diesel_job;
pub mod diesel_models;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod store;
pub mod util;

pub use diesel_content::DieselContentRepository;
pub use diesel_job::DieselJobRepository;
pub use error::StoreError;
pub use pool::{DbPool, DieselError};
pub use store::{ContentStore, JobKey, JobStore, Relink, ResolvedJob};
