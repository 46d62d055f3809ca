//! Store interfaces consumed by the scheduler and the reconciliation engine.

use async_trait::async_trait;

use super::error::StoreError;
use crate::models::{
    Episode, JobItem, JobRequest, Medium, MediumInfo, MediumType, NewEpisode, NewPart, News,
    NewsItem, Part, Release,
};

/// Identifies a stored job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKey {
    Id(i64),
    Name(String),
}

impl From<i64> for JobKey {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for JobKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// A job request whose `run_after` name has been resolved to an id.
#[derive(Debug, Clone)]
pub struct ResolvedJob {
    pub request: JobRequest,
    pub run_after: Option<i64>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Due, waiting jobs without a dependency edge, ordered by `next_run`.
    async fn get_jobs(&self, limit: usize) -> Result<Vec<JobItem>, StoreError>;

    async fn get_job(&self, key: &JobKey) -> Result<Option<JobItem>, StoreError>;

    async fn all_jobs(&self) -> Result<Vec<JobItem>, StoreError>;

    /// Insert jobs, reusing the stored row when the name already exists.
    ///
    /// Returns the stored rows in input order.
    async fn add_jobs(&self, jobs: &[ResolvedJob]) -> Result<Vec<JobItem>, StoreError>;

    async fn update_jobs(&self, jobs: &[JobItem]) -> Result<(), StoreError>;

    /// Delete a job and clear the dependency edge of jobs waiting on it.
    async fn remove_job(&self, key: &JobKey) -> Result<bool, StoreError>;

    /// Jobs whose `run_after` points at `id`.
    async fn get_after_jobs(&self, id: i64) -> Result<Vec<JobItem>, StoreError>;

    /// Reset running jobs to waiting and prune chained jobs whose referent is gone.
    async fn stop_jobs(&self) -> Result<(), StoreError>;
}

/// Outcome of moving an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relink {
    /// The episode moved; its id is unchanged.
    Moved,
    /// The target part already held the index; rows were merged into that episode.
    Merged { into: i64 },
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get_medium(&self, id: i64) -> Result<Option<Medium>, StoreError>;

    async fn find_medium_by_toc(&self, link: &str) -> Result<Option<Medium>, StoreError>;

    /// Match on the normalized title or any synonym.
    async fn find_medium_by_title(
        &self,
        title: &str,
        medium: MediumType,
    ) -> Result<Option<Medium>, StoreError>;

    async fn create_medium(&self, info: &MediumInfo) -> Result<Medium, StoreError>;

    async fn update_medium(&self, id: i64, info: &MediumInfo) -> Result<(), StoreError>;

    async fn add_synonyms(&self, medium_id: i64, synonyms: &[String]) -> Result<(), StoreError>;

    /// Returns false if the link was already attached.
    async fn add_toc(&self, medium_id: i64, link: &str) -> Result<bool, StoreError>;

    /// Detach a toc link; returns the medium it belonged to.
    async fn remove_toc(&self, link: &str) -> Result<Option<i64>, StoreError>;

    async fn get_tocs(&self) -> Result<Vec<(i64, String)>, StoreError>;

    async fn get_parts(&self, medium_id: i64) -> Result<Vec<Part>, StoreError>;

    async fn create_part(&self, part: &NewPart) -> Result<Part, StoreError>;

    /// Get or create the medium's standard part.
    async fn get_standard_part(&self, medium_id: i64) -> Result<Part, StoreError>;

    async fn find_standard_part(&self, medium_id: i64) -> Result<Option<Part>, StoreError>;

    /// Episodes of a part whose combi index is in `combi_indices`.
    async fn get_episodes(
        &self,
        part_id: i64,
        combi_indices: &[f64],
    ) -> Result<Vec<Episode>, StoreError>;

    async fn create_episodes(&self, episodes: &[NewEpisode]) -> Result<Vec<Episode>, StoreError>;

    async fn get_releases(&self, episode_ids: &[i64]) -> Result<Vec<Release>, StoreError>;

    /// Insert or replace releases in one transaction.
    async fn upsert_releases(&self, releases: &[Release]) -> Result<usize, StoreError>;

    /// Move an episode to another part.
    ///
    /// If the target part already has an episode with the same combi index,
    /// releases, progress and result rows are merged into it and the moved
    /// episode is deleted.
    async fn relink_episode(&self, episode_id: i64, target_part_id: i64)
        -> Result<Relink, StoreError>;

    /// Store news entries; existing links are skipped. Returns the new ones.
    async fn add_news(&self, news: &[News], medium_id: Option<i64>)
        -> Result<Vec<NewsItem>, StoreError>;
}
