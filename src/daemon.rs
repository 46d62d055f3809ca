//! Long-running crawler process.
//!
//! Wires storage, the request layer, site hooks and the scheduler together,
//! and feeds every published scrape result through the reconciler. Follow-up
//! jobs produced by reconciliation go back into the scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::jobs::{check_tocs_job, register_handlers};
use crate::models::{EventKind, JobRequest, JobType};
use crate::reconcile::{Reconciled, Reconciler};
use crate::repository::migrations::run_migrations;
use crate::repository::{DbPool, DieselContentRepository, DieselJobRepository};
use crate::scheduler::liveness::{exit_process, HttpProbe};
use crate::scheduler::{
    HandlerRegistry, LivenessGuard, Scheduler, ScrapeEvent, ScrapeResult,
};
use crate::scrapers::{
    BrowserFetcher, ChallengeResolver, GenericFeed, HookRegistry, HttpClient, QueueConfig,
    RequestQueue,
};

/// Open the configured database and bring its schema up to date.
pub async fn open_database(config: &Config) -> anyhow::Result<DbPool> {
    let url = config.database_url();
    let pool = DbPool::new(&url);
    if let Some(parent) = std::path::Path::new(pool.database_url()).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    run_migrations(&pool)
        .await
        .with_context(|| format!("migrating {}", pool.database_url()))?;
    Ok(pool)
}

/// Build the challenge-aware client from the HTTP, challenge and browser settings.
pub fn build_client(config: &Config) -> ChallengeResolver {
    let queue = RequestQueue::new(QueueConfig::with_base_delay(config.http.request_delay()));
    let http = HttpClient::new(
        config.http.timeout(),
        config.http.user_agent.as_deref(),
        queue,
    );
    let resolver = ChallengeResolver::new(Arc::new(http), config.challenge.clone());
    if config.challenge.browser_fallback {
        resolver.with_browser(Arc::new(BrowserFetcher::new(config.browser.clone())))
    } else {
        resolver
    }
}

/// A scheduler and the reconciler consuming its results.
#[derive(Clone)]
pub struct Daemon {
    scheduler: Scheduler,
    reconciler: Reconciler,
}

impl Daemon {
    pub fn new(scheduler: Scheduler, reconciler: Reconciler) -> Self {
        Self {
            scheduler,
            reconciler,
        }
    }

    /// Assemble the whole process from `config`. `hooks` carries the site
    /// adapters; a generic RSS/Atom reader is added for unclaimed feeds.
    pub async fn build(config: &Config, mut hooks: HookRegistry) -> anyhow::Result<Self> {
        let pool = open_database(config).await?;
        let jobs = Arc::new(DieselJobRepository::new(pool.clone()));
        let content = Arc::new(DieselContentRepository::new(pool));
        let reconciler = Reconciler::new(content);

        hooks.with_fallback_feed(Arc::new(GenericFeed::new()));
        info!(hooks = hooks.len(), "Site hooks loaded");

        let mut handlers = HandlerRegistry::new();
        register_handlers(
            &mut handlers,
            Arc::new(hooks),
            Arc::new(build_client(config)),
            jobs.clone(),
            reconciler.clone(),
        );

        let scheduler = Scheduler::new(jobs, handlers, config.scheduler.clone());
        Ok(Self::new(scheduler, reconciler))
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Subscribe a consumer task to every event channel.
    ///
    /// Must be called before the scheduler starts; events published while
    /// nobody listens are lost.
    pub fn spawn_consumers(&self) -> Vec<JoinHandle<()>> {
        EventKind::ALL
            .into_iter()
            .map(|kind| {
                let mut events = self.scheduler.subscribe(kind);
                let this = self.clone();
                tokio::spawn(async move {
                    loop {
                        match events.recv().await {
                            Ok(event) => this.handle_event(kind, event).await,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(channel = kind.as_str(), skipped, "Event consumer lagged");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    debug!(channel = kind.as_str(), "Event consumer stopped");
                })
            })
            .collect()
    }

    /// Reconcile one published event.
    pub async fn handle_event(&self, kind: EventKind, event: ScrapeEvent) {
        match event {
            ScrapeEvent::Result { job_name, result } => {
                let outcome = match &result {
                    ScrapeResult::Toc(toc) => self.reconciler.process_toc(toc).await,
                    ScrapeResult::News(news) => self.reconciler.process_news(news).await,
                    ScrapeResult::List(list) => self.reconciler.process_list(list).await,
                };
                if outcome.failed > 0 {
                    warn!(job = %job_name, failed = outcome.failed, "Result partly reconciled");
                }
                self.enqueue(outcome).await;
            }
            ScrapeEvent::Failed { job_name, error } => {
                debug!(channel = %kind.error_name(), job = %job_name, error = %error, "Job error");
                let broken = kind == EventKind::Toc
                    && error.kind.is_some_and(|k| k.invalidates_source());
                if let (true, Some(url)) = (broken, error.url.as_deref()) {
                    self.retire_toc(url).await;
                }
            }
        }
    }

    async fn enqueue(&self, outcome: Reconciled) {
        if outcome.jobs.is_empty() {
            return;
        }
        match self.scheduler.add_jobs(outcome.jobs).await {
            Ok(added) => debug!(added = added.len(), "Queued follow-up jobs"),
            Err(e) => error!(error = %e, "Failed to queue follow-up jobs"),
        }
    }

    /// Detach a toc link whose pages no longer parse and drop its jobs.
    async fn retire_toc(&self, url: &str) {
        if let Err(e) = self.reconciler.retire_toc(url).await {
            error!(url, error = %e, "Failed to remove toc");
        }
        for job_type in [JobType::Toc, JobType::OneTimeToc] {
            let name = JobRequest::scrape_name(job_type, url);
            if let Err(e) = self.scheduler.remove_job(&name).await {
                error!(job = %name, error = %e, "Failed to remove job");
            }
        }
    }

    /// Run until ctrl-c. The liveness guard is armed when `config` enables it.
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        self.scheduler
            .add_jobs(vec![check_tocs_job()])
            .await
            .context("adding the toc sweep job")?;

        let consumers = self.spawn_consumers();
        let guard = config.liveness.enabled.then(|| {
            LivenessGuard::new(
                Arc::new(HttpProbe::new(&config.liveness)),
                Duration::from_secs(config.liveness.probe_interval_secs.max(1)),
                exit_process(),
            )
        });
        let handle = self.scheduler.start(guard).await?;

        tokio::signal::ctrl_c()
            .await
            .context("waiting for ctrl-c")?;
        info!("Shutting down");
        self.scheduler.stop();
        handle.wait_for_shutdown().await;
        for consumer in consumers {
            consumer.abort();
        }
        Ok(())
    }
}
