//! Diesel-based job repository for SQLite.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::diesel_models::{JobRecord, NewJobRecord};
use super::error::StoreError;
use super::pool::{DbPool, DieselError};
use super::store::{JobKey, JobStore, ResolvedJob};
use super::util::{flag, stored_timestamp, read_timestamp_opt};
use crate::models::{JobItem, JobState, JobType};
use crate::schema::jobs;
use crate::with_conn;

impl TryFrom<JobRecord> for JobItem {
    type Error = StoreError;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        let job_type = JobType::from_str(&record.job_type).ok_or_else(|| {
            StoreError::Invalid(format!(
                "job {} has unknown type '{}'",
                record.name, record.job_type
            ))
        })?;
        Ok(JobItem {
            id: record.id,
            name: record.name,
            job_type,
            arguments: record.arguments,
            state: JobState::from_str(&record.state).unwrap_or(JobState::Waiting),
            interval: record.interval_ms,
            next_run: read_timestamp_opt(record.next_run),
            last_run: read_timestamp_opt(record.last_run),
            running_since: read_timestamp_opt(record.running_since),
            delete_after_run: record.delete_after_run != 0,
            run_after: record.run_after,
        })
    }
}

fn into_items(records: Vec<JobRecord>) -> Result<Vec<JobItem>, StoreError> {
    records.into_iter().map(JobItem::try_from).collect()
}

/// Diesel-based job repository.
#[derive(Clone)]
pub struct DieselJobRepository {
    pool: DbPool,
}

impl DieselJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_record(&self, key: &JobKey) -> Result<Option<JobRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            let found = match key {
                JobKey::Id(id) => jobs::table.find(*id).first::<JobRecord>(&mut conn).await,
                JobKey::Name(name) => {
                    jobs::table
                        .filter(jobs::name.eq(name))
                        .first::<JobRecord>(&mut conn)
                        .await
                }
            };
            found.optional()
        })
    }
}

#[async_trait]
impl JobStore for DieselJobRepository {
    async fn get_jobs(&self, limit: usize) -> Result<Vec<JobItem>, StoreError> {
        let now = stored_timestamp(Utc::now());
        let records = with_conn!(self.pool, conn, {
            jobs::table
                .filter(jobs::state.eq(JobState::Waiting.as_str()))
                .filter(jobs::run_after.is_null())
                .filter(jobs::next_run.is_null().or(jobs::next_run.le(&now)))
                .order(jobs::next_run.asc())
                .limit(limit as i64)
                .load::<JobRecord>(&mut conn)
                .await?
        });
        into_items(records)
    }

    async fn get_job(&self, key: &JobKey) -> Result<Option<JobItem>, StoreError> {
        self.find_record(key)
            .await?
            .map(JobItem::try_from)
            .transpose()
    }

    async fn all_jobs(&self) -> Result<Vec<JobItem>, StoreError> {
        let records = with_conn!(self.pool, conn, {
            jobs::table
                .order(jobs::id.asc())
                .load::<JobRecord>(&mut conn)
                .await?
        });
        into_items(records)
    }

    async fn add_jobs(&self, new_jobs: &[ResolvedJob]) -> Result<Vec<JobItem>, StoreError> {
        if new_jobs.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let new_jobs = new_jobs.to_vec();

        let records = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let mut stored = Vec::with_capacity(new_jobs.len());
                    for job in &new_jobs {
                        let request = &job.request;
                        let record = NewJobRecord {
                            name: &request.name,
                            job_type: request.job_type.as_str(),
                            arguments: request.arguments.as_deref(),
                            state: JobState::Waiting.as_str(),
                            interval_ms: request.interval,
                            next_run: request.initial_next_run(now).map(stored_timestamp),
                            delete_after_run: flag(request.delete_after_run),
                            run_after: job.run_after,
                        };
                        diesel::insert_or_ignore_into(jobs::table)
                            .values(&record)
                            .execute(conn)
                            .await?;

                        let row = jobs::table
                            .filter(jobs::name.eq(&request.name))
                            .first::<JobRecord>(conn)
                            .await?;
                        stored.push(row);
                    }
                    Ok(stored)
                })
            })
            .await?
        });
        into_items(records)
    }

    async fn update_jobs(&self, items: &[JobItem]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        let items = items.to_vec();

        with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    for item in &items {
                        diesel::update(jobs::table.find(item.id))
                            .set((
                                jobs::arguments.eq(&item.arguments),
                                jobs::state.eq(item.state.as_str()),
                                jobs::interval_ms.eq(item.interval),
                                jobs::next_run.eq(item.next_run.map(stored_timestamp)),
                                jobs::last_run.eq(item.last_run.map(stored_timestamp)),
                                jobs::running_since.eq(item.running_since.map(stored_timestamp)),
                                jobs::delete_after_run.eq(flag(item.delete_after_run)),
                                jobs::run_after.eq(item.run_after),
                            ))
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await?;
        });
        Ok(())
    }

    async fn remove_job(&self, key: &JobKey) -> Result<bool, StoreError> {
        let Some(record) = self.find_record(key).await? else {
            return Ok(false);
        };
        let id = record.id;

        let removed = with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    diesel::update(jobs::table.filter(jobs::run_after.eq(id)))
                        .set(jobs::run_after.eq(None::<i64>))
                        .execute(conn)
                        .await?;
                    let rows = diesel::delete(jobs::table.find(id)).execute(conn).await?;
                    Ok(rows > 0)
                })
            })
            .await?
        });
        Ok(removed)
    }

    async fn get_after_jobs(&self, id: i64) -> Result<Vec<JobItem>, StoreError> {
        let records = with_conn!(self.pool, conn, {
            jobs::table
                .filter(jobs::run_after.eq(id))
                .load::<JobRecord>(&mut conn)
                .await?
        });
        into_items(records)
    }

    async fn stop_jobs(&self) -> Result<(), StoreError> {
        with_conn!(self.pool, conn, {
            conn.transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    diesel::update(jobs::table.filter(jobs::state.eq(JobState::Running.as_str())))
                        .set((
                            jobs::state.eq(JobState::Waiting.as_str()),
                            jobs::running_since.eq(None::<String>),
                        ))
                        .execute(conn)
                        .await?;

                    let ids: HashSet<i64> = jobs::table
                        .select(jobs::id)
                        .load::<i64>(conn)
                        .await?
                        .into_iter()
                        .collect();
                    let chained: Vec<(i64, Option<i64>)> = jobs::table
                        .filter(jobs::run_after.is_not_null())
                        .select((jobs::id, jobs::run_after))
                        .load(conn)
                        .await?;
                    let orphans: Vec<i64> = chained
                        .into_iter()
                        .filter(|(_, after)| after.map_or(false, |a| !ids.contains(&a)))
                        .map(|(id, _)| id)
                        .collect();

                    if !orphans.is_empty() {
                        tracing::info!(count = orphans.len(), "Pruning orphaned chained jobs");
                        diesel::delete(jobs::table.filter(jobs::id.eq_any(&orphans)))
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await?;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobRequest;
    use crate::repository::migrations::run_migrations;
    use diesel_async::SimpleAsyncConnection;
    use tempfile::tempdir;

    async fn setup_test_db() -> (DbPool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let pool = DbPool::from_path(&dir.path().join("test.db"));
        run_migrations(&pool).await.unwrap();
        (pool, dir)
    }

    fn resolved(request: JobRequest, run_after: Option<i64>) -> ResolvedJob {
        ResolvedJob { request, run_after }
    }

    #[tokio::test]
    async fn test_add_jobs_is_idempotent_by_name() {
        let (pool, _dir) = setup_test_db().await;
        let repo = DieselJobRepository::new(pool);

        let first = JobRequest::periodic("toc-a", JobType::Toc, Some("{\"url\":\"a\"}".into()), 60_000);
        let mut second = first.clone();
        second.arguments = Some("{\"url\":\"b\"}".into());

        let a = repo.add_jobs(&[resolved(first, None)]).await.unwrap();
        let b = repo.add_jobs(&[resolved(second, None)]).await.unwrap();

        assert_eq!(a[0].id, b[0].id);
        assert_eq!(b[0].arguments.as_deref(), Some("{\"url\":\"a\"}"));
        assert_eq!(repo.all_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_jobs_skips_chained_and_future() {
        let (pool, _dir) = setup_test_db().await;
        let repo = DieselJobRepository::new(pool);

        let parent = repo
            .add_jobs(&[resolved(JobRequest::one_time("parent", JobType::News, None), None)])
            .await
            .unwrap();
        repo.add_jobs(&[resolved(
            JobRequest::one_time("child", JobType::News, None),
            Some(parent[0].id),
        )])
        .await
        .unwrap();

        let mut later = JobRequest::periodic("later", JobType::Feed, None, 3_600_000);
        later.run_immediately = false;
        repo.add_jobs(&[resolved(later, None)]).await.unwrap();

        let due = repo.get_jobs(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "parent");

        let after = repo.get_after_jobs(parent[0].id).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].name, "child");
    }

    #[tokio::test]
    async fn test_remove_job_clears_dependents() {
        let (pool, _dir) = setup_test_db().await;
        let repo = DieselJobRepository::new(pool);

        let parent = repo
            .add_jobs(&[resolved(JobRequest::one_time("parent", JobType::News, None), None)])
            .await
            .unwrap();
        repo.add_jobs(&[resolved(
            JobRequest::one_time("child", JobType::News, None),
            Some(parent[0].id),
        )])
        .await
        .unwrap();

        assert!(repo.remove_job(&JobKey::from("parent")).await.unwrap());
        assert!(!repo.remove_job(&JobKey::from("parent")).await.unwrap());

        let child = repo.get_job(&JobKey::from("child")).await.unwrap().unwrap();
        assert_eq!(child.run_after, None);
        assert_eq!(repo.get_jobs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_jobs_resets_running_and_prunes_orphans() {
        let (pool, _dir) = setup_test_db().await;
        let repo = DieselJobRepository::new(pool.clone());

        let stored = repo
            .add_jobs(&[resolved(
                JobRequest::periodic("toc-a", JobType::Toc, None, 60_000),
                None,
            )])
            .await
            .unwrap();
        let mut running = stored[0].clone();
        running.mark_running(Utc::now());
        repo.update_jobs(&[running]).await.unwrap();

        // A chained job whose referent vanished without clearing the edge.
        let mut conn = pool.get().await.unwrap();
        conn.batch_execute(
            "PRAGMA foreign_keys = OFF;
             INSERT INTO jobs (name, job_type, state, interval_ms, delete_after_run, run_after)
             VALUES ('orphan', 'news', 'waiting', 0, 1, 9999);",
        )
        .await
        .unwrap();

        repo.stop_jobs().await.unwrap();

        let all = repo.all_jobs().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, JobState::Waiting);
        assert!(all[0].running_since.is_none());
    }
}
