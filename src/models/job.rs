//! Persisted scheduler jobs.
//!
//! A `JobItem` is the stored unit of work. Its `name` is the idempotency key:
//! adding a job whose name already exists reuses the stored row.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work a job performs. Selects the handler and the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Periodic check of a known toc link.
    Toc,
    /// First scrape of a newly added toc link.
    OneTimeToc,
    Feed,
    News,
    /// External user list import.
    List,
    /// Sweep emitting toc jobs for every stored toc link.
    CheckTocs,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Toc => "toc",
            Self::OneTimeToc => "one_time_toc",
            Self::Feed => "feed",
            Self::News => "news",
            Self::List => "list",
            Self::CheckTocs => "check_tocs",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "toc" => Some(Self::Toc),
            "one_time_toc" => Some(Self::OneTimeToc),
            "feed" => Some(Self::Feed),
            "news" => Some(Self::News),
            "list" => Some(Self::List),
            "check_tocs" => Some(Self::CheckTocs),
            _ => None,
        }
    }

    /// Event channel this job type publishes on, if any.
    pub fn event_kind(&self) -> Option<EventKind> {
        match self {
            Self::Toc | Self::OneTimeToc => Some(EventKind::Toc),
            Self::Feed => Some(EventKind::Feed),
            Self::News => Some(EventKind::News),
            Self::List => Some(EventKind::List),
            Self::CheckTocs => None,
        }
    }
}

/// Closed set of result channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Toc,
    Feed,
    News,
    List,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [Self::Toc, Self::Feed, Self::News, Self::List];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Toc => "toc",
            Self::Feed => "feed",
            Self::News => "news",
            Self::List => "list",
        }
    }

    /// Name of the failure channel, e.g. `toc:error`.
    pub fn error_name(&self) -> String {
        format!("{}:error", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Running,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "running" => Some(Self::Running),
            _ => None,
        }
    }
}

/// A stored job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItem {
    pub id: i64,
    /// Unique key used for idempotent upserts.
    pub name: String,
    pub job_type: JobType,
    /// Opaque payload, JSON for the built-in handlers.
    pub arguments: Option<String>,
    pub state: JobState,
    /// Milliseconds between runs; `<= 0` means one-time.
    pub interval: i64,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub running_since: Option<DateTime<Utc>>,
    pub delete_after_run: bool,
    /// Id of the job this one waits for.
    pub run_after: Option<i64>,
}

impl JobItem {
    pub fn is_periodic(&self) -> bool {
        self.interval > 0
    }

    /// Whether the job may run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.next_run.map_or(true, |next| next <= now)
    }

    /// Transition into the running state.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Running;
        self.running_since = Some(now);
        self.last_run = Some(now);
    }

    /// Transition back to waiting and compute the next run.
    ///
    /// The interval is clamped to `min_interval_ms` before it is used.
    pub fn reschedule(&mut self, min_interval_ms: i64) {
        self.state = JobState::Waiting;
        self.running_since = None;
        if self.interval > 0 {
            self.interval = self.interval.max(min_interval_ms);
            let base = self.last_run.unwrap_or_else(Utc::now);
            self.next_run = Some(base + Duration::milliseconds(self.interval));
        }
    }

    /// Decode the JSON arguments.
    pub fn parse_arguments<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.arguments.as_deref().unwrap_or("null"))
    }
}

/// A job to be added to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    pub job_type: JobType,
    pub arguments: Option<String>,
    pub interval: i64,
    pub delete_after_run: bool,
    /// Run as soon as it is admitted instead of after the first interval.
    pub run_immediately: bool,
    /// Name of the job this one must wait for.
    pub run_after: Option<String>,
}

impl JobRequest {
    /// A job that runs once and is then removed.
    pub fn one_time(name: impl Into<String>, job_type: JobType, arguments: Option<String>) -> Self {
        Self {
            name: name.into(),
            job_type,
            arguments,
            interval: 0,
            delete_after_run: true,
            run_immediately: true,
            run_after: None,
        }
    }

    /// A job that runs every `interval_ms`.
    pub fn periodic(
        name: impl Into<String>,
        job_type: JobType,
        arguments: Option<String>,
        interval_ms: i64,
    ) -> Self {
        Self {
            name: name.into(),
            job_type,
            arguments,
            interval: interval_ms,
            delete_after_run: false,
            run_immediately: true,
            run_after: None,
        }
    }

    /// A scrape job for `url`, named after its type and link.
    ///
    /// `interval_ms <= 0` gives a one-time job.
    pub fn scrape(
        job_type: JobType,
        url: &str,
        medium_id: Option<i64>,
        interval_ms: i64,
    ) -> Self {
        let name = Self::scrape_name(job_type, url);
        let arguments = Some(ScrapeArguments::new(url, medium_id).to_json());
        if interval_ms > 0 {
            Self::periodic(name, job_type, arguments, interval_ms)
        } else {
            Self::one_time(name, job_type, arguments)
        }
    }

    pub fn scrape_name(job_type: JobType, url: &str) -> String {
        format!("{}-{}", job_type.as_str(), url)
    }

    pub fn with_run_after(mut self, name: impl Into<String>) -> Self {
        self.run_after = Some(name.into());
        self
    }

    /// First `next_run` for a freshly inserted job.
    pub fn initial_next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.run_immediately || self.interval <= 0 {
            None
        } else {
            Some(now + Duration::milliseconds(self.interval))
        }
    }
}

/// Arguments of toc, feed, news and list jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeArguments {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium_id: Option<i64>,
}

impl ScrapeArguments {
    pub fn new(url: impl Into<String>, medium_id: Option<i64>) -> Self {
        Self {
            url: url.into(),
            medium_id,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(interval: i64) -> JobItem {
        JobItem {
            id: 1,
            name: "toc-1".to_string(),
            job_type: JobType::Toc,
            arguments: None,
            state: JobState::Waiting,
            interval,
            next_run: None,
            last_run: None,
            running_since: None,
            delete_after_run: false,
            run_after: None,
        }
    }

    #[test]
    fn test_job_type_round_trip() {
        for ty in [
            JobType::Toc,
            JobType::OneTimeToc,
            JobType::Feed,
            JobType::News,
            JobType::List,
            JobType::CheckTocs,
        ] {
            assert_eq!(JobType::from_str(ty.as_str()), Some(ty));
        }
        assert_eq!(JobType::from_str("bogus"), None);
    }

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(JobType::OneTimeToc.event_kind(), Some(EventKind::Toc));
        assert_eq!(JobType::CheckTocs.event_kind(), None);
        assert_eq!(EventKind::Feed.error_name(), "feed:error");
    }

    #[test]
    fn test_reschedule_clamps_interval() {
        let mut item = job(1_000);
        let now = Utc::now();
        item.mark_running(now);
        assert_eq!(item.state, JobState::Running);

        item.reschedule(60_000);
        assert_eq!(item.state, JobState::Waiting);
        assert_eq!(item.interval, 60_000);
        assert_eq!(item.next_run, Some(now + Duration::milliseconds(60_000)));
        assert!(item.running_since.is_none());
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut item = job(60_000);
        assert!(item.is_due(now));

        item.next_run = Some(now + Duration::seconds(10));
        assert!(!item.is_due(now));

        item.next_run = Some(now - Duration::seconds(10));
        item.state = JobState::Running;
        assert!(!item.is_due(now));
    }

    #[test]
    fn test_scrape_arguments_json() {
        let args = ScrapeArguments::new("https://example.com/toc", Some(4));
        let json = args.to_json();
        assert!(json.contains("\"mediumId\":4"));

        let mut item = job(0);
        item.arguments = Some(json);
        let parsed: ScrapeArguments = item.parse_arguments().unwrap();
        assert_eq!(parsed, args);
    }

    #[test]
    fn test_scrape_request_shape() {
        let once = JobRequest::scrape(JobType::OneTimeToc, "https://example.com/a", None, 0);
        assert_eq!(once.name, "one_time_toc-https://example.com/a");
        assert!(once.delete_after_run);

        let periodic = JobRequest::scrape(JobType::Toc, "https://example.com/a", Some(2), 5_000);
        assert_eq!(periodic.interval, 5_000);
        assert!(!periodic.delete_after_run);
        assert!(periodic.arguments.unwrap().contains("\"mediumId\":2"));
    }
}
