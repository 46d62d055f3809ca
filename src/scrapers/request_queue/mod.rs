//! Per-host request serialization.
//!
//! At most one request per host is in flight at a time. Between requests the
//! host's politeness delay is observed; the delay backs off on 429/503 and
//! recovers after a run of successes.

mod host_state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use url::Url;

use host_state::{HostState, Pacing};

/// Pacing parameters.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub base_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub recovery_multiplier: f64,
    /// Successes needed before the delay shrinks again.
    pub recovery_threshold: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.8,
            recovery_threshold: 5,
        }
    }
}

impl QueueConfig {
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            min_delay: base_delay.min(Duration::from_millis(100)),
            ..Self::default()
        }
    }
}

struct HostEntry {
    gate: Arc<Mutex<()>>,
    state: HostState,
}

/// Exclusive right to send one request to a host. Dropping it releases the host.
pub struct QueueTicket {
    host: Option<String>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl QueueTicket {
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

/// Per-host request queue shared by every client of a session.
#[derive(Clone)]
pub struct RequestQueue {
    config: QueueConfig,
    hosts: Arc<Mutex<HashMap<String, HostEntry>>>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            hosts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue key for a URL.
    pub fn host_of(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|s| s.to_ascii_lowercase()))
    }

    /// Wait for the host to be free and paced, then claim it.
    ///
    /// URLs without a host are not queued.
    pub async fn acquire(&self, url: &str) -> QueueTicket {
        let Some(host) = Self::host_of(url) else {
            return QueueTicket {
                host: None,
                _guard: None,
            };
        };

        let gate = {
            let mut hosts = self.hosts.lock().await;
            hosts
                .entry(host.clone())
                .or_insert_with(|| HostEntry {
                    gate: Arc::new(Mutex::new(())),
                    state: HostState::new(&self.config),
                })
                .gate
                .clone()
        };
        let guard = gate.lock_owned().await;

        // The gate is held, so nobody else can mark this host sent meanwhile.
        let wait = self.with_state(&host, |s| s.ready_in()).await;
        if let Some(wait) = wait.filter(|w| !w.is_zero()) {
            debug!(host = %host, ?wait, "Pacing request");
            tokio::time::sleep(wait).await;
        }
        self.with_state(&host, HostState::mark_sent).await;

        QueueTicket {
            host: Some(host),
            _guard: Some(guard),
        }
    }

    /// Feed the response status back into the host's pacing.
    pub async fn report(&self, ticket: &QueueTicket, status: u16) {
        let Some(host) = ticket.host() else {
            return;
        };
        let config = &self.config;
        let outcome = self
            .with_state(host, |s| match status {
                429 | 503 => Some((s.throttled(config), s.delay)),
                200..=399 => Some((s.succeeded(config), s.delay)),
                _ => None,
            })
            .await
            .flatten();

        match outcome {
            Some((Pacing::Slowed, delay)) => {
                warn!(host, status, ?delay, "Host is throttling, backing off")
            }
            Some((Pacing::Eased, delay)) => debug!(host, ?delay, "Easing host delay"),
            Some((Pacing::Recovered, _)) => info!(host, "Host recovered from backoff"),
            _ => {}
        }
    }

    async fn with_state<T>(&self, host: &str, f: impl FnOnce(&mut HostState) -> T) -> Option<T> {
        let mut hosts = self.hosts.lock().await;
        hosts.get_mut(host).map(|e| f(&mut e.state))
    }

    /// Current delay for a host, if it has been seen.
    pub async fn current_delay(&self, host: &str) -> Option<Duration> {
        let hosts = self.hosts.lock().await;
        hosts.get(host).map(|e| e.state.delay)
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn config() -> QueueConfig {
        QueueConfig {
            base_delay: Duration::from_millis(100),
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.5,
            recovery_threshold: 2,
        }
    }

    #[test]
    fn test_host_of() {
        assert_eq!(
            RequestQueue::host_of("https://WWW.Example.com/a"),
            Some("www.example.com".to_string())
        );
        assert_eq!(RequestQueue::host_of("not a url"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_to_same_host_are_paced() {
        let queue = RequestQueue::new(config());

        let start = Instant::now();
        let first = queue.acquire("https://example.com/1").await;
        drop(first);
        let _second = queue.acquire("https://example.com/2").await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_in_flight_per_host() {
        let queue = RequestQueue::new(config());
        let ticket = queue.acquire("https://example.com/1").await;

        let other = queue.clone();
        let waiter = tokio::spawn(async move {
            let _t = other.acquire("https://example.com/2").await;
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        // Different hosts are independent.
        let _unrelated = queue.acquire("https://other.com/").await;

        drop(ticket);
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_and_recovery() {
        let queue = RequestQueue::new(config());
        let ticket = queue.acquire("https://example.com/").await;

        queue.report(&ticket, 429).await;
        assert_eq!(
            queue.current_delay("example.com").await,
            Some(Duration::from_millis(200))
        );

        queue.report(&ticket, 200).await;
        queue.report(&ticket, 200).await;
        assert_eq!(
            queue.current_delay("example.com").await,
            Some(Duration::from_millis(100))
        );
    }
}
