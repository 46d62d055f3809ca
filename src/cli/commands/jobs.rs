//! Job inspection and enqueueing.

use console::style;

use crate::cli::helpers::job_row;
use crate::config::Config;
use crate::daemon::open_database;
use crate::jobs::check_tocs_job;
use crate::models::{JobRequest, JobType};
use crate::repository::{DieselJobRepository, JobStore, ResolvedJob};

/// Store a scrape job for `url`; a running daemon picks it up on its next fetch.
pub async fn cmd_enqueue(
    config: &Config,
    job_type: JobType,
    url: &str,
    medium_id: Option<i64>,
    interval_ms: i64,
) -> anyhow::Result<()> {
    let request = if job_type == JobType::CheckTocs {
        check_tocs_job()
    } else {
        JobRequest::scrape(job_type, url, medium_id, interval_ms)
    };

    let repo = DieselJobRepository::new(open_database(config).await?);
    let stored = repo
        .add_jobs(&[ResolvedJob {
            request,
            run_after: None,
        }])
        .await?;

    for job in stored {
        println!("{} Queued {} (id {})", style("✓").green(), job.name, job.id);
    }
    Ok(())
}

pub async fn cmd_jobs(config: &Config) -> anyhow::Result<()> {
    let repo = DieselJobRepository::new(open_database(config).await?);
    let jobs = repo.all_jobs().await?;

    if jobs.is_empty() {
        println!("{} No jobs stored", style("!").yellow());
        return Ok(());
    }

    println!(
        "{}",
        style(format!(
            "{:>5}  {:<12} {:<8} {:>6}  {:<16}  {}",
            "ID", "TYPE", "STATE", "EVERY", "NEXT RUN", "NAME"
        ))
        .bold()
    );
    for job in &jobs {
        println!("{}", job_row(job));
    }
    println!("{} {} jobs", style("→").dim(), jobs.len());
    Ok(())
}
