//! Built-in job handlers.
//!
//! Scrape handlers look up the site hook for the job's link and run the
//! matching capability through the shared challenge resolver. Failures are
//! tagged with the job's link so a broken toc source can be retired.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::models::{JobItem, JobRequest, JobType, ScrapeArguments, TocResult};
use crate::reconcile::{Reconciler, TOC_INTERVAL_MS};
use crate::repository::JobStore;
use crate::scheduler::{HandlerRegistry, JobError, JobHandler, JobOutput, ScrapeResult};
use crate::scrapers::{ChallengeResolver, HookRegistry};

/// Name of the periodic toc sweep.
pub const CHECK_TOCS_JOB: &str = "check-tocs";
/// Interval of the toc sweep.
pub const CHECK_TOCS_INTERVAL_MS: i64 = 60 * 60 * 1000;

fn arguments(job: &JobItem) -> Result<ScrapeArguments, JobError> {
    Ok(job.parse_arguments::<ScrapeArguments>()?)
}

fn no_scraper(capability: &str, url: &str) -> JobError {
    JobError::new(format!("no {} scraper for {}", capability, url)).with_url(url)
}

/// Runs `Toc` and `OneTimeToc` jobs.
pub struct TocHandler {
    hooks: Arc<HookRegistry>,
    client: Arc<ChallengeResolver>,
}

#[async_trait]
impl JobHandler for TocHandler {
    async fn run(&self, job: &JobItem) -> Result<JobOutput, JobError> {
        let args = arguments(job)?;
        let scraper = self
            .hooks
            .toc(&args.url)
            .ok_or_else(|| no_scraper("toc", &args.url))?;
        let tocs = scraper
            .toc(&self.client, &args.url)
            .await
            .map_err(|e| JobError::from(e).with_url(&args.url))?;
        debug!(url = %args.url, tocs = tocs.len(), "Scraped toc");
        Ok(JobOutput::Event(ScrapeResult::Toc(TocResult {
            url: args.url,
            medium_id: args.medium_id,
            tocs,
            first_scrape: job.job_type == JobType::OneTimeToc,
        })))
    }
}

/// Runs `News` and `Feed` jobs.
pub struct NewsHandler {
    hooks: Arc<HookRegistry>,
    client: Arc<ChallengeResolver>,
}

#[async_trait]
impl JobHandler for NewsHandler {
    async fn run(&self, job: &JobItem) -> Result<JobOutput, JobError> {
        let args = arguments(job)?;
        let result = if job.job_type == JobType::Feed {
            let scraper = self
                .hooks
                .feed(&args.url)
                .ok_or_else(|| no_scraper("feed", &args.url))?;
            scraper.feed(&self.client, &args.url).await
        } else {
            let scraper = self
                .hooks
                .news(&args.url)
                .ok_or_else(|| no_scraper("news", &args.url))?;
            scraper.news(&self.client, &args.url).await
        };
        let result = result.map_err(|e| JobError::from(e).with_url(&args.url))?;
        Ok(JobOutput::Event(ScrapeResult::News(result)))
    }
}

/// Runs `List` jobs.
pub struct ListHandler {
    hooks: Arc<HookRegistry>,
    client: Arc<ChallengeResolver>,
}

#[async_trait]
impl JobHandler for ListHandler {
    async fn run(&self, job: &JobItem) -> Result<JobOutput, JobError> {
        let args = arguments(job)?;
        let scraper = self
            .hooks
            .list(&args.url)
            .ok_or_else(|| no_scraper("list", &args.url))?;
        let result = scraper
            .list(&self.client, &args.url)
            .await
            .map_err(|e| JobError::from(e).with_url(&args.url))?;
        Ok(JobOutput::Event(ScrapeResult::List(result)))
    }
}

/// Emits a periodic toc job for every stored toc link that lacks one.
pub struct CheckTocsHandler {
    jobs: Arc<dyn JobStore>,
    reconciler: Reconciler,
}

impl CheckTocsHandler {
    pub fn new(jobs: Arc<dyn JobStore>, reconciler: Reconciler) -> Self {
        Self { jobs, reconciler }
    }
}

#[async_trait]
impl JobHandler for CheckTocsHandler {
    async fn run(&self, _job: &JobItem) -> Result<JobOutput, JobError> {
        let names: Vec<String> = self
            .jobs
            .all_jobs()
            .await?
            .into_iter()
            .map(|j| j.name)
            .collect();
        let missing = self
            .reconciler
            .unchecked_tocs(&names)
            .await
            .map_err(|e| JobError::new(e.to_string()))?;
        debug!(missing = missing.len(), "Checked toc jobs");
        Ok(JobOutput::Jobs(
            missing
                .into_iter()
                .map(|(medium_id, link)| {
                    JobRequest::scrape(JobType::Toc, &link, Some(medium_id), TOC_INTERVAL_MS)
                })
                .collect(),
        ))
    }
}

/// The periodic toc sweep job.
pub fn check_tocs_job() -> JobRequest {
    JobRequest::periodic(CHECK_TOCS_JOB, JobType::CheckTocs, None, CHECK_TOCS_INTERVAL_MS)
}

/// Register a handler for every job type.
pub fn register_handlers(
    registry: &mut HandlerRegistry,
    hooks: Arc<HookRegistry>,
    client: Arc<ChallengeResolver>,
    jobs: Arc<dyn JobStore>,
    reconciler: Reconciler,
) {
    let toc = Arc::new(TocHandler {
        hooks: hooks.clone(),
        client: client.clone(),
    });
    let news = Arc::new(NewsHandler {
        hooks: hooks.clone(),
        client: client.clone(),
    });
    registry
        .register(JobType::Toc, toc.clone())
        .register(JobType::OneTimeToc, toc)
        .register(JobType::News, news.clone())
        .register(JobType::Feed, news)
        .register(JobType::List, Arc::new(ListHandler { hooks, client }))
        .register(
            JobType::CheckTocs,
            Arc::new(CheckTocsHandler::new(jobs, reconciler)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobState, Toc};
    use crate::repository::migrations::run_migrations;
    use crate::repository::{
        ContentStore, DbPool, DieselContentRepository, DieselJobRepository, ResolvedJob,
    };
    use crate::scrapers::hook::TocScraper;
    use crate::scrapers::{
        ChallengeConfig, CookieJar, ErrorKind, Hook, HttpResponse, RequestConfig, RequestSummary,
        ScrapeError, Transport,
    };
    use tempfile::tempdir;

    struct NoTransport {
        jar: Arc<CookieJar>,
    }

    #[async_trait]
    impl Transport for NoTransport {
        async fn send(&self, request: &RequestConfig) -> Result<HttpResponse, ScrapeError> {
            Err(ScrapeError::request_failed("offline", request.summary()))
        }

        fn cookie_jar(&self) -> Arc<CookieJar> {
            self.jar.clone()
        }
    }

    struct OneToc;

    #[async_trait]
    impl TocScraper for OneToc {
        async fn toc(&self, _: &ChallengeResolver, url: &str) -> Result<Vec<Toc>, ScrapeError> {
            if url.ends_with("/broken") {
                return Err(ScrapeError::parser(
                    "chapter list not found",
                    RequestSummary {
                        method: "GET".to_string(),
                        url: "https://novels.example/cdn/redirected".to_string(),
                    },
                    None,
                ));
            }
            Ok(vec![Toc {
                title: "Road".to_string(),
                link: url.to_string(),
                ..Default::default()
            }])
        }
    }

    fn client() -> Arc<ChallengeResolver> {
        Arc::new(ChallengeResolver::new(
            Arc::new(NoTransport {
                jar: Arc::new(CookieJar::new()),
            }),
            ChallengeConfig::default(),
        ))
    }

    fn hooks() -> Arc<HookRegistry> {
        let mut hooks = HookRegistry::new();
        hooks.register(Hook::new("novels", &["novels.example"]).with_toc(Arc::new(OneToc)));
        Arc::new(hooks)
    }

    fn job(job_type: JobType, url: &str) -> JobItem {
        JobItem {
            id: 1,
            name: JobRequest::scrape_name(job_type, url),
            job_type,
            arguments: Some(ScrapeArguments::new(url, Some(3)).to_json()),
            state: JobState::Running,
            interval: 0,
            next_run: None,
            last_run: None,
            running_since: None,
            delete_after_run: true,
            run_after: None,
        }
    }

    #[tokio::test]
    async fn test_one_time_toc_marks_first_scrape() {
        let handler = TocHandler {
            hooks: hooks(),
            client: client(),
        };
        let output = handler
            .run(&job(JobType::OneTimeToc, "https://novels.example/road"))
            .await
            .unwrap();
        match output {
            JobOutput::Event(ScrapeResult::Toc(result)) => {
                assert!(result.first_scrape);
                assert_eq!(result.medium_id, Some(3));
                assert_eq!(result.tocs.len(), 1);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_carries_job_link() {
        let handler = TocHandler {
            hooks: hooks(),
            client: client(),
        };
        let err = handler
            .run(&job(JobType::Toc, "https://novels.example/broken"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Parser));
        assert_eq!(err.url.as_deref(), Some("https://novels.example/broken"));

        let err = handler
            .run(&job(JobType::Toc, "https://elsewhere.example/x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, None);
    }

    #[tokio::test]
    async fn test_feed_uses_fallback_and_reports_request_errors() {
        let mut registry = HookRegistry::new();
        registry.with_fallback_feed(Arc::new(crate::scrapers::GenericFeed::new()));
        let handler = NewsHandler {
            hooks: Arc::new(registry),
            client: client(),
        };
        let err = handler
            .run(&job(JobType::Feed, "https://blog.example/rss"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Request));

        let err = handler
            .run(&job(JobType::News, "https://blog.example/"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, None);
    }

    #[tokio::test]
    async fn test_check_tocs_emits_missing_jobs() {
        let dir = tempdir().unwrap();
        let pool = DbPool::from_path(&dir.path().join("test.db"));
        run_migrations(&pool).await.unwrap();
        let content = Arc::new(DieselContentRepository::new(pool.clone()));
        let jobs = Arc::new(DieselJobRepository::new(pool));

        let medium = content
            .create_medium(&crate::models::MediumInfo {
                title: "Road".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        content.add_toc(medium.id, "https://novels.example/a").await.unwrap();
        content.add_toc(medium.id, "https://novels.example/b").await.unwrap();
        jobs.add_jobs(&[ResolvedJob {
            request: JobRequest::scrape(JobType::Toc, "https://novels.example/a", None, 1_000),
            run_after: None,
        }])
        .await
        .unwrap();

        let handler = CheckTocsHandler::new(jobs, Reconciler::new(content));
        match handler.run(&job(JobType::CheckTocs, "")).await.unwrap() {
            JobOutput::Jobs(requests) => {
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].name, "toc-https://novels.example/b");
                assert_eq!(requests[0].interval, TOC_INTERVAL_MS);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }
}
