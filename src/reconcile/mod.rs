//! Reconciliation of scrape results into canonical storage.
//!
//! Every medium in a batch is merged on its own: a failure is logged and the
//! rest of the batch carries on. Results may also produce follow-up jobs
//! (periodic toc checks, newly discovered feeds and toc links) which the
//! caller hands back to the scheduler.

mod error;
mod toc;

pub use error::ReconcileError;
pub use toc::ReconcileReport;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::models::{
    JobRequest, JobType, ListResult, MediumInfo, NewsItem, NewsResult, Toc, TocResult,
};
use crate::repository::ContentStore;
use toc::TocMerge;

/// Interval of the periodic check created after a toc's first scrape.
pub const TOC_INTERVAL_MS: i64 = 24 * 60 * 60 * 1000;
/// Interval of periodic jobs for newly discovered feeds.
pub const FEED_INTERVAL_MS: i64 = 10 * 60 * 1000;

/// Outcome of processing one result batch.
#[derive(Debug, Default)]
pub struct Reconciled {
    pub reports: Vec<ReconcileReport>,
    pub news: Vec<NewsItem>,
    /// Follow-up jobs for the scheduler.
    pub jobs: Vec<JobRequest>,
    /// Media whose merge failed.
    pub failed: usize,
}

impl Reconciled {
    fn push_job(&mut self, job: JobRequest) {
        if !self.jobs.iter().any(|j| j.name == job.name) {
            self.jobs.push(job);
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ContentStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Merge one toc.
    pub async fn reconcile_toc(&self, toc: &Toc) -> Result<ReconcileReport, ReconcileError> {
        TocMerge::run(self.store.as_ref(), toc).await
    }

    /// Merge every toc of a toc job result.
    pub async fn process_toc(&self, result: &TocResult) -> Reconciled {
        let mut outcome = Reconciled::default();
        let single = result.tocs.len() == 1;

        for toc in &result.tocs {
            let mut toc = toc.clone();
            if toc.link.is_empty() {
                toc.link = result.url.clone();
            }
            if single && toc.medium_id.is_none() {
                toc.medium_id = result.medium_id;
            }

            match self.reconcile_toc(&toc).await {
                Ok(report) => {
                    info!(
                        medium_id = report.medium_id,
                        link = %toc.link,
                        new_parts = report.new_parts,
                        new_episodes = report.new_episodes,
                        relocated = report.relocated_episodes,
                        new_releases = report.new_releases,
                        updated_releases = report.updated_releases,
                        "Reconciled toc"
                    );
                    if result.first_scrape {
                        outcome.push_job(JobRequest::scrape(
                            JobType::Toc,
                            &toc.link,
                            Some(report.medium_id),
                            TOC_INTERVAL_MS,
                        ));
                    }
                    outcome.reports.push(report);
                }
                Err(e) => {
                    error!(link = %toc.link, error = %e, "Failed to reconcile toc");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    /// Store news and queue jobs for discovered feeds and toc links.
    pub async fn process_news(&self, result: &NewsResult) -> Reconciled {
        let mut outcome = Reconciled::default();

        if !result.news.is_empty() {
            match self.store.add_news(&result.news, None).await {
                Ok(added) => {
                    info!(source = %result.source, added = added.len(), "Stored news");
                    outcome.news = added;
                }
                Err(e) => {
                    error!(source = %result.source, error = %e, "Failed to store news");
                    outcome.failed += 1;
                }
            }
        }

        for feed in &result.feeds {
            outcome.push_job(JobRequest::scrape(JobType::Feed, feed, None, FEED_INTERVAL_MS));
        }
        for link in &result.tocs {
            match self.store.find_medium_by_toc(link).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    outcome.push_job(JobRequest::scrape(JobType::OneTimeToc, link, None, 0));
                }
                Err(e) => warn!(link = %link, error = %e, "Toc lookup failed"),
            }
        }
        outcome
    }

    /// Resolve every listed medium and queue a first scrape of new toc links.
    pub async fn process_list(&self, result: &ListResult) -> Reconciled {
        let mut outcome = Reconciled::default();

        for listed in &result.media {
            let attached = async {
                let existing = match self.store.find_medium_by_toc(&listed.toc_link).await? {
                    Some(medium) => Some(medium),
                    None => {
                        self.store
                            .find_medium_by_title(&listed.title, listed.medium_type)
                            .await?
                    }
                };
                let (medium, created) = match existing {
                    Some(medium) => (medium, false),
                    None => {
                        let info = MediumInfo {
                            title: listed.title.clone(),
                            medium: listed.medium_type,
                            ..Default::default()
                        };
                        (self.store.create_medium(&info).await?, true)
                    }
                };
                let new_link = self.store.add_toc(medium.id, &listed.toc_link).await?;
                Ok::<_, ReconcileError>((medium.id, created, new_link))
            }
            .await;

            match attached {
                Ok((medium_id, created, new_link)) => {
                    if new_link {
                        outcome.push_job(JobRequest::scrape(
                            JobType::OneTimeToc,
                            &listed.toc_link,
                            Some(medium_id),
                            0,
                        ));
                    }
                    outcome.reports.push(ReconcileReport {
                        created_medium: created,
                        ..ReconcileReport::new(medium_id)
                    });
                }
                Err(e) => {
                    error!(title = %listed.title, error = %e, "Failed to import listed medium");
                    outcome.failed += 1;
                }
            }
        }
        info!(
            source = %result.source,
            media = outcome.reports.len(),
            queued = outcome.jobs.len(),
            "Imported list"
        );
        outcome
    }

    /// Detach a broken toc link. Returns the medium it belonged to.
    pub async fn retire_toc(&self, link: &str) -> Result<Option<i64>, ReconcileError> {
        let medium_id = self.store.remove_toc(link).await?;
        if let Some(id) = medium_id {
            warn!(medium_id = id, link, "Removed broken toc source");
        }
        Ok(medium_id)
    }

    /// Toc links that have no periodic toc job among `job_names`.
    pub async fn unchecked_tocs(
        &self,
        job_names: &[String],
    ) -> Result<Vec<(i64, String)>, ReconcileError> {
        let tocs = self.store.get_tocs().await?;
        Ok(tocs
            .into_iter()
            .filter(|(_, link)| {
                let name = JobRequest::scrape_name(JobType::Toc, link);
                !job_names.iter().any(|n| *n == name)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListMedium, MediumType, News, TocContent};
    use crate::repository::migrations::run_migrations;
    use crate::repository::{DbPool, DieselContentRepository};
    use chrono::Utc;
    use tempfile::tempdir;

    async fn setup() -> (Reconciler, Arc<DieselContentRepository>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = DbPool::from_path(&dir.path().join("test.db"));
        run_migrations(&pool).await.unwrap();
        let repo = Arc::new(DieselContentRepository::new(pool));
        (Reconciler::new(repo.clone()), repo, dir)
    }

    fn toc(title: &str, link: &str, content: Vec<TocContent>) -> Toc {
        Toc {
            title: title.to_string(),
            link: link.to_string(),
            content,
            ..Default::default()
        }
    }

    fn episode(index: f64) -> TocContent {
        TocContent {
            total_index: Some(index),
            url: Some(format!("https://novels.example/e/{}", index)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_one_bad_medium_does_not_stop_batch() {
        let (reconciler, _repo, _dir) = setup().await;
        let result = TocResult {
            url: "https://novels.example/page".to_string(),
            medium_id: None,
            tocs: vec![
                toc("Broken", "https://novels.example/a", vec![TocContent::default()]),
                toc("Fine", "https://novels.example/b", vec![episode(1.0)]),
            ],
            first_scrape: true,
        };

        let outcome = reconciler.process_toc(&result).await;
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(outcome.jobs[0].name, "toc-https://novels.example/b");
        assert_eq!(outcome.jobs[0].interval, TOC_INTERVAL_MS);
    }

    #[tokio::test]
    async fn test_periodic_check_only_after_first_scrape() {
        let (reconciler, _repo, _dir) = setup().await;
        let result = TocResult {
            url: "https://novels.example/b".to_string(),
            medium_id: None,
            tocs: vec![toc("Fine", "", vec![episode(1.0)])],
            first_scrape: false,
        };
        let outcome = reconciler.process_toc(&result).await;
        assert_eq!(outcome.reports.len(), 1);
        assert!(outcome.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_news_queues_feeds_and_unknown_tocs() {
        let (reconciler, repo, _dir) = setup().await;
        let known = repo
            .create_medium(&MediumInfo {
                title: "Known".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        repo.add_toc(known.id, "https://novels.example/known").await.unwrap();

        let result = NewsResult {
            source: "https://novels.example/".to_string(),
            news: vec![News {
                title: "Chapter 3 is out".to_string(),
                link: "https://novels.example/news/3".to_string(),
                date: Utc::now(),
                medium_type: None,
                locked: false,
            }],
            feeds: vec!["https://novels.example/feed".to_string()],
            tocs: vec![
                "https://novels.example/known".to_string(),
                "https://novels.example/new".to_string(),
            ],
        };

        let outcome = reconciler.process_news(&result).await;
        assert_eq!(outcome.news.len(), 1);
        let names: Vec<_> = outcome.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "feed-https://novels.example/feed",
                "one_time_toc-https://novels.example/new"
            ]
        );

        let again = reconciler.process_news(&result).await;
        assert!(again.news.is_empty());
    }

    #[tokio::test]
    async fn test_list_import_queues_new_links_once() {
        let (reconciler, _repo, _dir) = setup().await;
        let result = ListResult {
            source: "https://lists.example/me".to_string(),
            media: vec![ListMedium {
                title: "Listed".to_string(),
                medium_type: MediumType::Text,
                toc_link: "https://novels.example/listed".to_string(),
            }],
        };

        let first = reconciler.process_list(&result).await;
        assert_eq!(first.reports.len(), 1);
        assert!(first.reports[0].created_medium);
        assert_eq!(first.jobs.len(), 1);
        assert_eq!(first.jobs[0].job_type, JobType::OneTimeToc);

        let second = reconciler.process_list(&result).await;
        assert!(!second.reports[0].created_medium);
        assert!(second.jobs.is_empty());
    }

    #[tokio::test]
    async fn test_retire_and_unchecked_tocs() {
        let (reconciler, _repo, _dir) = setup().await;
        let result = TocResult {
            url: "https://novels.example/b".to_string(),
            medium_id: None,
            tocs: vec![toc("Fine", "", vec![episode(1.0)])],
            first_scrape: false,
        };
        reconciler.process_toc(&result).await;

        let unchecked = reconciler.unchecked_tocs(&[]).await.unwrap();
        assert_eq!(unchecked.len(), 1);
        let covered = reconciler
            .unchecked_tocs(&["toc-https://novels.example/b".to_string()])
            .await
            .unwrap();
        assert!(covered.is_empty());

        assert!(reconciler
            .retire_toc("https://novels.example/b")
            .await
            .unwrap()
            .is_some());
        assert!(reconciler.unchecked_tocs(&[]).await.unwrap().is_empty());
    }
}
