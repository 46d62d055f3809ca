//! Shared helper functions for CLI commands.

use chrono::{DateTime, Utc};

use crate::models::{JobItem, JobType};

/// Parse a job type name as given on the command line.
pub fn parse_job_type(s: &str) -> Result<JobType, String> {
    JobType::from_str(&s.replace('-', "_")).ok_or_else(|| {
        format!(
            "unknown job type '{}' (expected toc, one-time-toc, feed, news, list or check-tocs)",
            s
        )
    })
}

/// Human-readable interval, e.g. `1d`, `10m`, `once`.
pub fn format_interval(ms: i64) -> String {
    if ms <= 0 {
        return "once".to_string();
    }
    let secs = ms / 1000;
    match secs {
        s if s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// One table row for `tocwatch jobs`.
pub fn job_row(job: &JobItem) -> String {
    format!(
        "{:>5}  {:<12} {:<8} {:>6}  {:<16}  {}",
        job.id,
        job.job_type.as_str(),
        job.state.as_str(),
        format_interval(job.interval),
        format_time(job.next_run),
        job.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_type_accepts_dashes() {
        assert_eq!(parse_job_type("one-time-toc"), Ok(JobType::OneTimeToc));
        assert_eq!(parse_job_type("feed"), Ok(JobType::Feed));
        assert!(parse_job_type("docs").is_err());
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(0), "once");
        assert_eq!(format_interval(86_400_000), "1d");
        assert_eq!(format_interval(600_000), "10m");
        assert_eq!(format_interval(90_000), "90s");
    }
}
