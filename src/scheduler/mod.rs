//! Bounded-concurrency job scheduler.
//!
//! Jobs live in the [`JobStore`]; the scheduler pulls due ones into a
//! bounded in-memory queue, runs at most `max_active` of them at a time and
//! writes the outcome back. Results of emittable job types are published on
//! the [`EventBus`]; job requests returned by handlers are added back to the
//! store.

mod error;
mod events;
mod handler;
pub mod liveness;
pub mod memory;
mod queue;

pub use error::{JobError, SchedulerError};
pub use events::{EventBus, ScrapeEvent};
pub use handler::{HandlerRegistry, JobHandler, JobOutput, ScrapeResult};
pub use liveness::{LivenessConfig, LivenessGuard};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::models::{EventKind, JobItem, JobRequest};
use crate::repository::{JobKey, JobStore, ResolvedJob};
use queue::JobQueue;

/// How long a request may wait for the job named in its `run_after`.
const HOLD_LIMIT: Duration = Duration::from_secs(60 * 60);
/// Re-check interval while admissions are blocked by the memory budget.
const DISPATCH_RECHECK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs running at once.
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Queue size; defaults to twice `max_active`.
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    #[serde(default = "default_fetch_interval_secs")]
    pub fetch_interval_secs: u64,

    /// Resident memory above which no new job starts.
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,

    /// Lower bound for periodic job intervals.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: i64,
}

fn default_max_active() -> usize {
    50
}

fn default_fetch_interval_secs() -> u64 {
    60
}

fn default_min_interval_ms() -> i64 {
    60_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
            queue_capacity: None,
            fetch_interval_secs: default_fetch_interval_secs(),
            memory_limit_mb: None,
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.max_active * 2)
    }
}

/// A request waiting for the job it depends on.
struct HeldJob {
    request: JobRequest,
    since: Instant,
}

struct Inner {
    store: Arc<dyn JobStore>,
    handlers: HandlerRegistry,
    events: EventBus,
    config: SchedulerConfig,
    queue: Mutex<JobQueue>,
    held: tokio::sync::Mutex<Vec<HeldJob>>,
    paused: AtomicBool,
    wake: Notify,
    shutdown: watch::Sender<bool>,
}

/// Cheap to clone; all clones drive the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Handles of the background loops started by [`Scheduler::start`].
pub struct RunHandle {
    handles: Vec<JoinHandle<()>>,
}

impl RunHandle {
    /// Wait until every loop has exited.
    pub async fn wait_for_shutdown(self) {
        for result in join_all(self.handles).await {
            if let Err(error) = result {
                warn!(%error, "Scheduler task panicked");
            }
        }
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        handlers: HandlerRegistry,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                handlers,
                events: EventBus::default(),
                queue: Mutex::new(JobQueue::new(config.capacity())),
                config,
                held: tokio::sync::Mutex::new(Vec::new()),
                paused: AtomicBool::new(false),
                wake: Notify::new(),
                shutdown,
            }),
        }
    }

    pub fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<ScrapeEvent> {
        self.inner.events.subscribe(kind)
    }

    fn queue(&self) -> MutexGuard<'_, JobQueue> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of admitted jobs, waiting or running.
    pub fn queued(&self) -> usize {
        self.queue().len()
    }

    pub fn active(&self) -> usize {
        self.queue().running()
    }

    pub fn running_since(&self) -> Vec<DateTime<Utc>> {
        self.queue().running_since()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Recover from a previous crash, load due jobs and start the loops.
    pub async fn start(
        &self,
        liveness: Option<LivenessGuard>,
    ) -> Result<RunHandle, SchedulerError> {
        self.inner.store.stop_jobs().await?;
        let admitted = self.fetch_jobs().await?;
        info!(
            admitted,
            max_active = self.inner.config.max_active,
            "Scheduler started"
        );

        let mut handles = vec![
            tokio::spawn(self.clone().tick_loop()),
            tokio::spawn(self.clone().dispatch_loop()),
        ];
        if let Some(guard) = liveness {
            let this = self.clone();
            let mut shutdown = self.inner.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let probe = this.clone();
                tokio::select! {
                    _ = guard.run(move || probe.running_since()) => {}
                    _ = shutdown.changed() => {}
                }
            }));
        }
        Ok(RunHandle { handles })
    }

    async fn tick_loop(self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let period = Duration::from_secs(self.inner.config.fetch_interval_secs.max(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.fetch_jobs().await {
                        error!(error = %e, "Failed to fetch jobs");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Tick loop stopped");
    }

    async fn dispatch_loop(self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        while !*shutdown.borrow() {
            self.dispatch();
            tokio::select! {
                _ = self.inner.wake.notified() => {}
                _ = tokio::time::sleep(DISPATCH_RECHECK) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!("Dispatch loop stopped");
    }

    /// Start waiting jobs while there is room. Returns how many started.
    fn dispatch(&self) -> usize {
        if self.is_paused() || *self.inner.shutdown.borrow() {
            return 0;
        }
        let mut started = 0;
        loop {
            if memory::over_budget(self.inner.config.memory_limit_mb) {
                debug!(
                    limit_mb = self.inner.config.memory_limit_mb,
                    "Memory budget exceeded, holding back jobs"
                );
                break;
            }
            let next = {
                let mut queue = self.queue();
                if queue.running() >= self.inner.config.max_active {
                    break;
                }
                queue.start_next(Utc::now())
            };
            let Some(item) = next else {
                break;
            };
            let this = self.clone();
            tokio::spawn(async move { this.run_job(item).await });
            started += 1;
        }
        started
    }

    async fn run_job(&self, item: JobItem) {
        let started = Instant::now();
        if let Err(e) = self
            .inner
            .store
            .update_jobs(std::slice::from_ref(&item))
            .await
        {
            warn!(job = %item.name, error = %e, "Failed to mark job running");
        }
        debug!(job = %item.name, job_type = item.job_type.as_str(), "Job started");

        let outcome = match self.inner.handlers.get(item.job_type) {
            Some(handler) => {
                let job = item.clone();
                tokio::spawn(async move { handler.run(&job).await })
                    .await
                    .unwrap_or_else(|e| Err(JobError::new(format!("job handler panicked: {}", e))))
            }
            None => Err(JobError::new(
                SchedulerError::NoHandler(item.job_type).to_string(),
            )),
        };
        self.deliver(&item, outcome).await;
        info!(
            job = %item.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        );

        let id = item.id;
        if let Err(e) = self.on_done(item).await {
            error!(job_id = id, error = %e, "Failed to complete job");
        }
        self.queue().finish(id);
        self.inner.wake.notify_one();
    }

    async fn deliver(&self, item: &JobItem, outcome: Result<JobOutput, JobError>) {
        let kind = item.job_type.event_kind();
        match outcome {
            Ok(JobOutput::Done) => {}
            Ok(JobOutput::Jobs(requests)) => {
                if let Err(e) = self.add_jobs(requests).await {
                    error!(job = %item.name, error = %e, "Failed to add jobs");
                }
            }
            Ok(JobOutput::Event(result)) => match kind {
                Some(kind) => {
                    self.inner.events.publish(
                        kind,
                        ScrapeEvent::Result {
                            job_name: item.name.clone(),
                            result,
                        },
                    );
                }
                None => warn!(job = %item.name, "Job type has no event channel, result dropped"),
            },
            Err(error) => match kind {
                Some(kind) => {
                    warn!(job = %item.name, error = %error, "Job failed");
                    self.inner.events.publish(
                        kind,
                        ScrapeEvent::Failed {
                            job_name: item.name.clone(),
                            error,
                        },
                    );
                }
                None => error!(job = %item.name, error = %error, "Job failed"),
            },
        }
    }

    /// Persist a finished job and admit the jobs chained after it.
    async fn on_done(&self, mut item: JobItem) -> Result<(), SchedulerError> {
        let store = &self.inner.store;
        let after = store.get_after_jobs(item.id).await?;

        if item.delete_after_run || !item.is_periodic() {
            store.remove_job(&JobKey::Id(item.id)).await?;
        } else {
            item.reschedule(self.inner.config.min_interval_ms);
            store.update_jobs(&[item]).await?;
        }

        if !after.is_empty() {
            debug!(count = after.len(), "Admitting chained jobs");
            self.admit(after);
        }
        Ok(())
    }

    /// Queue due jobs. Returns how many were admitted.
    fn admit(&self, items: Vec<JobItem>) -> usize {
        let now = Utc::now();
        let admitted = {
            let mut queue = self.queue();
            items
                .into_iter()
                .filter(|item| item.is_due(now))
                .filter(|item| queue.admit(item.clone()))
                .count()
        };
        if admitted > 0 {
            self.inner.wake.notify_one();
        }
        admitted
    }

    /// Pull due jobs from the store into the queue.
    pub async fn fetch_jobs(&self) -> Result<usize, SchedulerError> {
        if self.is_paused() {
            return Ok(0);
        }
        let free = self.queue().free();
        if free == 0 {
            debug!("Queue full, skipping fetch");
            return Ok(0);
        }
        let jobs = self.inner.store.get_jobs(free).await?;
        Ok(self.admit(jobs))
    }

    /// Add jobs to the store, reusing rows whose name already exists.
    ///
    /// A request whose `run_after` names a job that does not exist yet is
    /// held back and retried on later calls; it is dropped once it has
    /// waited longer than an hour. Returns the stored rows.
    pub async fn add_jobs(&self, requests: Vec<JobRequest>) -> Result<Vec<JobItem>, SchedulerError> {
        let mut held = self.inner.held.lock().await;
        let now = Instant::now();
        let mut pending: Vec<HeldJob> = held
            .drain(..)
            .chain(requests.into_iter().map(|request| HeldJob { request, since: now }))
            .collect();

        let mut known: HashMap<String, i64> = HashMap::new();
        let mut stored = Vec::new();
        loop {
            let mut ready = Vec::new();
            let mut waiting = Vec::new();
            for job in pending {
                let run_after = match &job.request.run_after {
                    None => None,
                    Some(name) => match self.resolve_name(name, &known).await? {
                        Some(id) => Some(id),
                        None => {
                            waiting.push(job);
                            continue;
                        }
                    },
                };
                ready.push(ResolvedJob {
                    request: job.request,
                    run_after,
                });
            }
            pending = waiting;
            if ready.is_empty() {
                break;
            }
            for item in self.inner.store.add_jobs(&ready).await? {
                known.insert(item.name.clone(), item.id);
                stored.push(item);
            }
            if pending.is_empty() {
                break;
            }
        }

        for job in pending {
            if job.since.elapsed() > HOLD_LIMIT {
                warn!(
                    job = %job.request.name,
                    run_after = ?job.request.run_after,
                    "Dropping job, the job it waits for never appeared"
                );
            } else {
                debug!(job = %job.request.name, run_after = ?job.request.run_after, "Holding job");
                held.push(job);
            }
        }
        drop(held);

        self.admit(
            stored
                .iter()
                .filter(|item| item.run_after.is_none())
                .cloned()
                .collect(),
        );
        Ok(stored)
    }

    async fn resolve_name(
        &self,
        name: &str,
        known: &HashMap<String, i64>,
    ) -> Result<Option<i64>, SchedulerError> {
        if let Some(id) = known.get(name) {
            return Ok(Some(*id));
        }
        Ok(self
            .inner
            .store
            .get_job(&JobKey::Name(name.to_string()))
            .await?
            .map(|job| job.id))
    }

    /// Number of requests waiting for their `run_after` job.
    pub async fn held(&self) -> usize {
        self.inner.held.lock().await.len()
    }

    /// Delete a stored job. A queued copy that has not started is dropped too.
    pub async fn remove_job(&self, name: &str) -> Result<bool, SchedulerError> {
        let removed = self
            .inner
            .store
            .remove_job(&JobKey::Name(name.to_string()))
            .await?;
        let mut queue = self.queue();
        if let Some(id) = queue.id_of(name) {
            queue.remove_waiting(id);
        }
        if removed {
            info!(job = name, "Removed job");
        }
        Ok(removed)
    }

    /// Stop starting jobs; running ones finish normally.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        info!("Scheduler paused");
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.wake.notify_one();
        info!("Scheduler resumed");
    }

    /// Discard waiting jobs. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        self.queue().clear_waiting()
    }

    /// Pause, discard the waiting set and stop the background loops.
    pub fn stop(&self) {
        self.pause();
        let dropped = self.clear();
        self.inner.shutdown.send_replace(true);
        info!(dropped, "Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::tempdir;

    use crate::models::{JobState, JobType, NewsResult};
    use crate::repository::migrations::run_migrations;
    use crate::repository::{DbPool, DieselJobRepository};
    use crate::scrapers::ErrorKind;

    async fn setup(
        handlers: HandlerRegistry,
    ) -> (Scheduler, Arc<DieselJobRepository>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = DbPool::from_path(&dir.path().join("test.db"));
        run_migrations(&pool).await.unwrap();
        let store = Arc::new(DieselJobRepository::new(pool));
        let config = SchedulerConfig {
            max_active: 2,
            ..Default::default()
        };
        (Scheduler::new(store.clone(), handlers, config), store, dir)
    }

    struct StaticHandler(fn(&JobItem) -> Result<JobOutput, JobError>);

    #[async_trait]
    impl JobHandler for StaticHandler {
        async fn run(&self, job: &JobItem) -> Result<JobOutput, JobError> {
            (self.0)(job)
        }
    }

    #[tokio::test]
    async fn test_add_jobs_is_idempotent() {
        let (scheduler, store, _dir) = setup(HandlerRegistry::new()).await;
        let first = JobRequest::periodic("toc-a", JobType::Toc, Some("first".into()), 60_000);
        let mut second = first.clone();
        second.arguments = Some("second".into());

        let a = scheduler.add_jobs(vec![first]).await.unwrap();
        let b = scheduler.add_jobs(vec![second]).await.unwrap();

        assert_eq!(a[0].id, b[0].id);
        assert_eq!(b[0].arguments.as_deref(), Some("first"));
        assert_eq!(store.all_jobs().await.unwrap().len(), 1);
        assert_eq!(scheduler.queued(), 1);
    }

    #[tokio::test]
    async fn test_run_after_waits_for_referent() {
        let (scheduler, store, _dir) = setup(HandlerRegistry::new()).await;
        let b = JobRequest::one_time("job-b", JobType::News, None).with_run_after("job-a");

        assert!(scheduler.add_jobs(vec![b]).await.unwrap().is_empty());
        assert!(store.all_jobs().await.unwrap().is_empty());
        assert_eq!(scheduler.held().await, 1);

        let a = JobRequest::one_time("job-a", JobType::News, None);
        let stored = scheduler.add_jobs(vec![a]).await.unwrap();
        assert_eq!(stored.len(), 2);
        let a = stored.iter().find(|j| j.name == "job-a").unwrap().clone();
        let b = stored.iter().find(|j| j.name == "job-b").unwrap().clone();
        assert_eq!(b.run_after, Some(a.id));
        assert_eq!(scheduler.held().await, 0);

        // Only the referent is admitted until it completes.
        assert_eq!(scheduler.queued(), 1);
        let running = scheduler.queue().start_next(Utc::now()).unwrap();
        assert_eq!(running.id, a.id);
        scheduler.on_done(running).await.unwrap();
        scheduler.queue().finish(a.id);

        assert!(scheduler.queue().contains(b.id));
        assert!(store.get_job(&JobKey::Id(a.id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chain_in_one_call() {
        let (scheduler, _store, _dir) = setup(HandlerRegistry::new()).await;
        let stored = scheduler
            .add_jobs(vec![
                JobRequest::one_time("c", JobType::News, None).with_run_after("b"),
                JobRequest::one_time("b", JobType::News, None).with_run_after("a"),
                JobRequest::one_time("a", JobType::News, None),
            ])
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(scheduler.held().await, 0);
        assert_eq!(scheduler.queued(), 1);
    }

    #[tokio::test]
    async fn test_periodic_job_rescheduled_with_clamp() {
        let (scheduler, store, _dir) = setup(HandlerRegistry::new()).await;
        scheduler
            .add_jobs(vec![JobRequest::periodic("toc-a", JobType::Toc, None, 1_000)])
            .await
            .unwrap();
        let running = scheduler.queue().start_next(Utc::now()).unwrap();
        let last_run = running.last_run.unwrap();
        scheduler.on_done(running).await.unwrap();

        let stored = store
            .get_job(&JobKey::Name("toc-a".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, JobState::Waiting);
        assert_eq!(stored.interval, 60_000);
        let next_run = stored.next_run.unwrap();
        assert!((next_run - last_run - chrono::Duration::milliseconds(60_000))
            .num_milliseconds()
            .abs()
            < 5);
    }

    #[tokio::test]
    async fn test_events_published_for_results_and_failures() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(
            JobType::News,
            Arc::new(StaticHandler(|job| {
                if job.name == "news-bad" {
                    Err(JobError {
                        kind: Some(ErrorKind::Parser),
                        url: Some("https://example.com/news".to_string()),
                        message: "layout changed".to_string(),
                    })
                } else {
                    Ok(JobOutput::Event(ScrapeResult::News(NewsResult::default())))
                }
            })),
        );
        let (scheduler, _store, _dir) = setup(handlers).await;
        let mut news = scheduler.subscribe(EventKind::News);
        let handle = scheduler.start(None).await.unwrap();

        scheduler
            .add_jobs(vec![JobRequest::one_time("news-ok", JobType::News, None)])
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), news.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ScrapeEvent::Result { .. }));
        assert_eq!(event.channel(EventKind::News), "news");

        scheduler
            .add_jobs(vec![JobRequest::one_time("news-bad", JobType::News, None)])
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), news.recv())
            .await
            .unwrap()
            .unwrap();
        let ScrapeEvent::Failed { error, .. } = &event else {
            panic!("expected failure, got {:?}", event);
        };
        assert_eq!(error.kind, Some(ErrorKind::Parser));
        assert_eq!(event.channel(EventKind::News), "news:error");

        scheduler.stop();
        handle.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn test_handler_job_requests_are_added() {
        let mut handlers = HandlerRegistry::new();
        handlers.register(
            JobType::CheckTocs,
            Arc::new(StaticHandler(|_| {
                Ok(JobOutput::Jobs(vec![JobRequest::periodic(
                    "toc-https://example.com/novel",
                    JobType::Toc,
                    None,
                    86_400_000,
                )]))
            })),
        );
        let (scheduler, store, _dir) = setup(handlers).await;
        let handle = scheduler.start(None).await.unwrap();
        scheduler
            .add_jobs(vec![JobRequest::one_time("check", JobType::CheckTocs, None)])
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let jobs = store.all_jobs().await.unwrap();
            if jobs.iter().any(|j| j.job_type == JobType::Toc)
                && !jobs.iter().any(|j| j.name == "check")
            {
                break;
            }
            assert!(Instant::now() < deadline, "toc job never appeared");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        scheduler.stop();
        handle.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_withholds_jobs() {
        let (scheduler, _store, _dir) = setup(HandlerRegistry::new()).await;
        scheduler
            .add_jobs(vec![JobRequest::one_time("a", JobType::News, None)])
            .await
            .unwrap();

        scheduler.pause();
        assert_eq!(scheduler.dispatch(), 0);
        assert_eq!(scheduler.fetch_jobs().await.unwrap(), 0);

        scheduler.resume();
        assert_eq!(scheduler.dispatch(), 1);
        assert_eq!(scheduler.active(), 1);
    }

    #[tokio::test]
    async fn test_remove_job_drops_waiting_copy() {
        let (scheduler, store, _dir) = setup(HandlerRegistry::new()).await;
        scheduler
            .add_jobs(vec![JobRequest::periodic("toc-a", JobType::Toc, None, 60_000)])
            .await
            .unwrap();
        assert_eq!(scheduler.queued(), 1);

        assert!(scheduler.remove_job("toc-a").await.unwrap());
        assert_eq!(scheduler.queued(), 0);
        assert!(store.all_jobs().await.unwrap().is_empty());
    }
}
