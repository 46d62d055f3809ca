//! Scheduler, handlers and reconciler wired together as the daemon runs them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::{tempdir, TempDir};

use tocwatch::daemon::Daemon;
use tocwatch::jobs::register_handlers;
use tocwatch::models::{JobRequest, JobType, MediumInfo, Toc, TocContent};
use tocwatch::reconcile::Reconciler;
use tocwatch::repository::migrations::run_migrations;
use tocwatch::repository::{
    ContentStore, DbPool, DieselContentRepository, DieselJobRepository, JobStore,
};
use tocwatch::scheduler::{HandlerRegistry, Scheduler, SchedulerConfig};
use tocwatch::scrapers::hook::TocScraper;
use tocwatch::scrapers::{
    ChallengeConfig, ChallengeResolver, CookieJar, Hook, HookRegistry, HttpResponse,
    RequestConfig, RequestSummary, ScrapeError, Transport,
};

struct Offline {
    jar: Arc<CookieJar>,
}

#[async_trait]
impl Transport for Offline {
    async fn send(&self, request: &RequestConfig) -> Result<HttpResponse, ScrapeError> {
        Err(ScrapeError::request_failed("offline", request.summary()))
    }

    fn cookie_jar(&self) -> Arc<CookieJar> {
        self.jar.clone()
    }
}

/// Serves a two-chapter toc, or a parse failure for links ending in `/gone`.
struct FixedToc;

#[async_trait]
impl TocScraper for FixedToc {
    async fn toc(&self, _: &ChallengeResolver, url: &str) -> Result<Vec<Toc>, ScrapeError> {
        if url.ends_with("/gone") {
            return Err(ScrapeError::parser(
                "chapter list missing",
                RequestSummary {
                    method: "GET".to_string(),
                    url: url.to_string(),
                },
                None,
            ));
        }
        Ok(vec![Toc {
            title: "The Long Road".to_string(),
            link: url.to_string(),
            content: (1..=2)
                .map(|i| TocContent {
                    total_index: Some(i as f64),
                    url: Some(format!("{}/{}", url, i)),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }])
    }
}

struct Harness {
    daemon: Daemon,
    jobs: Arc<DieselJobRepository>,
    content: Arc<DieselContentRepository>,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let dir = tempdir().unwrap();
    let pool = DbPool::from_path(&dir.path().join("tocwatch.db"));
    run_migrations(&pool).await.unwrap();
    let jobs = Arc::new(DieselJobRepository::new(pool.clone()));
    let content = Arc::new(DieselContentRepository::new(pool));
    let reconciler = Reconciler::new(content.clone());

    let mut hooks = HookRegistry::new();
    hooks.register(Hook::new("novels", &["novels.example"]).with_toc(Arc::new(FixedToc)));
    let client = ChallengeResolver::new(
        Arc::new(Offline {
            jar: Arc::new(CookieJar::new()),
        }),
        ChallengeConfig::default(),
    );

    let mut handlers = HandlerRegistry::new();
    register_handlers(
        &mut handlers,
        Arc::new(hooks),
        Arc::new(client),
        jobs.clone(),
        reconciler.clone(),
    );
    let scheduler = Scheduler::new(jobs.clone(), handlers, SchedulerConfig::default());

    Harness {
        daemon: Daemon::new(scheduler, reconciler),
        jobs,
        content,
        _dir: dir,
    }
}

async fn job_names(jobs: &DieselJobRepository) -> Vec<String> {
    jobs.all_jobs()
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.name)
        .collect()
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_first_scrape_stores_toc_and_schedules_checks() {
    let h = harness().await;
    let link = "https://novels.example/long-road";
    let consumers = h.daemon.spawn_consumers();
    let run = h.daemon.scheduler().start(None).await.unwrap();

    h.daemon
        .scheduler()
        .add_jobs(vec![JobRequest::scrape(JobType::OneTimeToc, link, None, 0)])
        .await
        .unwrap();

    let periodic = JobRequest::scrape_name(JobType::Toc, link);
    let once = JobRequest::scrape_name(JobType::OneTimeToc, link);
    let jobs = h.jobs.clone();
    assert!(
        eventually(|| {
            let jobs = jobs.clone();
            let (periodic, once) = (periodic.clone(), once.clone());
            async move {
                let names = job_names(&jobs).await;
                names.contains(&periodic) && !names.contains(&once)
            }
        })
        .await,
        "periodic toc job was not scheduled"
    );

    let medium = h.content.find_medium_by_toc(link).await.unwrap().unwrap();
    assert_eq!(medium.title, "The Long Road");
    let standard = h.content.find_standard_part(medium.id).await.unwrap().unwrap();
    assert_eq!(h.content.get_part_episodes(standard.id).await.unwrap().len(), 2);

    h.daemon.scheduler().stop();
    run.wait_for_shutdown().await;
    consumers.into_iter().for_each(|c| c.abort());
}

#[tokio::test]
async fn test_broken_toc_is_retired() {
    let h = harness().await;
    let link = "https://novels.example/gone";
    let medium = h
        .content
        .create_medium(&MediumInfo {
            title: "Vanished".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    h.content.add_toc(medium.id, link).await.unwrap();

    let consumers = h.daemon.spawn_consumers();
    let run = h.daemon.scheduler().start(None).await.unwrap();
    h.daemon
        .scheduler()
        .add_jobs(vec![JobRequest::scrape(
            JobType::Toc,
            link,
            Some(medium.id),
            24 * 60 * 60 * 1000,
        )])
        .await
        .unwrap();

    let content = h.content.clone();
    let jobs = h.jobs.clone();
    assert!(
        eventually(|| {
            let (content, jobs) = (content.clone(), jobs.clone());
            async move {
                content.find_medium_by_toc(link).await.unwrap().is_none()
                    && job_names(&jobs).await.is_empty()
            }
        })
        .await,
        "broken toc link was not retired"
    );
    assert!(h.content.get_medium(medium.id).await.unwrap().is_some());

    h.daemon.scheduler().stop();
    run.wait_for_shutdown().await;
    consumers.into_iter().for_each(|c| c.abort());
}
