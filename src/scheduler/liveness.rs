//! Connectivity watchdog.
//!
//! Jobs stuck on dead network handles never finish, so the scheduler would
//! slowly fill up with them. While an outbound probe fails, the outage
//! times are recorded; if enough jobs have been running for too long
//! relative to an outage, the process exits and leaves the restart to its
//! supervisor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// Jobs running longer than [`STUCK_AFTER_MINUTES`] at an outage.
const STUCK_JOBS: usize = 5;
const STUCK_AFTER_MINUTES: i64 = 30;
/// A single job running longer than this at an outage is enough.
const HUNG_AFTER_MINUTES: i64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_probe_url() -> String {
    "https://www.google.com/".to_string()
}

fn default_probe_interval_secs() -> u64 {
    60
}

fn default_probe_timeout_secs() -> u64 {
    10
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            probe_url: default_probe_url(),
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Whether the jobs running at `outage` look stuck.
pub fn should_terminate(outage: DateTime<Utc>, running_since: &[DateTime<Utc>]) -> bool {
    let longer_than = |minutes: i64| {
        let limit = chrono::Duration::minutes(minutes);
        running_since
            .iter()
            .filter(|since| outage - **since > limit)
            .count()
    };
    longer_than(STUCK_AFTER_MINUTES) >= STUCK_JOBS || longer_than(HUNG_AFTER_MINUTES) >= 1
}

/// Outbound connectivity check.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn reachable(&self) -> bool;
}

/// Probe that issues a HEAD request.
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(config: &LivenessConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            url: config.probe_url.clone(),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn reachable(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

/// Called with a reason when the guard gives up on the process.
pub type Terminator = Arc<dyn Fn(&str) + Send + Sync>;

/// Exit the process with a failure status.
pub fn exit_process() -> Terminator {
    Arc::new(|reason: &str| {
        error!(reason, "Terminating stuck process");
        std::process::exit(1);
    })
}

pub struct LivenessGuard {
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
    terminate: Terminator,
    outages: Vec<DateTime<Utc>>,
}

impl LivenessGuard {
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        interval: Duration,
        terminate: Terminator,
    ) -> Self {
        Self {
            probe,
            interval,
            terminate,
            outages: Vec::new(),
        }
    }

    /// Record one probe result. Returns true if the process should stop.
    pub fn observe(
        &mut self,
        reachable: bool,
        now: DateTime<Utc>,
        running_since: &[DateTime<Utc>],
    ) -> bool {
        if reachable {
            if !self.outages.is_empty() {
                debug!(outages = self.outages.len(), "Connectivity restored");
            }
            self.outages.clear();
            return false;
        }
        self.outages.push(now);
        self.outages
            .iter()
            .any(|outage| should_terminate(*outage, running_since))
    }

    /// Probe forever; `running_since` reports the start times of running jobs.
    pub async fn run<F>(mut self, running_since: F)
    where
        F: Fn() -> Vec<DateTime<Utc>> + Send,
    {
        loop {
            tokio::time::sleep(self.interval).await;
            let reachable = self.probe.reachable().await;
            let running = running_since();
            if self.observe(reachable, Utc::now(), &running) {
                let reason = format!(
                    "connectivity lost while {} jobs were running for too long",
                    running.len()
                );
                (self.terminate)(&reason);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn ago(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        now - chrono::Duration::minutes(minutes)
    }

    #[test]
    fn test_five_stuck_jobs_terminate() {
        let now = Utc::now();
        let four: Vec<_> = (0..4).map(|_| ago(now, 31)).collect();
        assert!(!should_terminate(now, &four));

        let five: Vec<_> = (0..5).map(|_| ago(now, 31)).collect();
        assert!(should_terminate(now, &five));
    }

    #[test]
    fn test_one_hung_job_terminates() {
        let now = Utc::now();
        assert!(!should_terminate(now, &[ago(now, 119)]));
        assert!(should_terminate(now, &[ago(now, 121)]));
    }

    #[test]
    fn test_young_jobs_survive() {
        let now = Utc::now();
        let running: Vec<_> = (0..20).map(|_| ago(now, 5)).collect();
        assert!(!should_terminate(now, &running));
    }

    struct DownProbe;

    #[async_trait]
    impl ConnectivityProbe for DownProbe {
        async fn reachable(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_recovery_clears_outages() {
        let now = Utc::now();
        let mut guard = LivenessGuard::new(
            Arc::new(DownProbe),
            Duration::from_secs(60),
            Arc::new(|_: &str| {}),
        );
        assert!(!guard.observe(false, now, &[]));
        assert!(!guard.observe(true, now, &[ago(now, 300)]));
        assert!(guard.observe(false, now, &[ago(now, 300)]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_calls_terminator() {
        let called = Arc::new(AtomicBool::new(false));
        let probes = Arc::new(AtomicUsize::new(0));
        let flag = called.clone();
        let guard = LivenessGuard::new(
            Arc::new(DownProbe),
            Duration::from_secs(60),
            Arc::new(move |_: &str| flag.store(true, Ordering::SeqCst)),
        );
        let counter = probes.clone();
        let started = Utc::now() - chrono::Duration::hours(3);
        guard
            .run(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                vec![started]
            })
            .await;
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }
}
