//! Schema bootstrap.
//!
//! The schema is a single idempotent batch; running it against an existing
//! database is a no-op.

use diesel_async::SimpleAsyncConnection;
use tracing::info;

use super::pool::{DbPool, DieselError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    job_type TEXT NOT NULL,
    arguments TEXT,
    state TEXT NOT NULL DEFAULT 'waiting',
    interval_ms INTEGER NOT NULL DEFAULT 0,
    next_run TEXT,
    last_run TEXT,
    running_since TEXT,
    delete_after_run INTEGER NOT NULL DEFAULT 0,
    run_after INTEGER REFERENCES jobs(id) ON DELETE SET NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(state, next_run);
CREATE INDEX IF NOT EXISTS idx_jobs_run_after ON jobs(run_after);

CREATE TABLE IF NOT EXISTS media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    medium TEXT NOT NULL,
    author TEXT,
    artist TEXT,
    lang_of_origin TEXT,
    country_of_origin TEXT,
    finished INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS medium_synonyms (
    medium_id INTEGER NOT NULL REFERENCES media(id) ON DELETE CASCADE,
    synonym TEXT NOT NULL,
    PRIMARY KEY (medium_id, synonym)
);

CREATE TABLE IF NOT EXISTS medium_tocs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    medium_id INTEGER NOT NULL REFERENCES media(id) ON DELETE CASCADE,
    link TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS parts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    medium_id INTEGER NOT NULL REFERENCES media(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    total_index INTEGER NOT NULL,
    partial_index INTEGER,
    combi_index REAL NOT NULL,
    UNIQUE (medium_id, combi_index)
);

CREATE TABLE IF NOT EXISTS episodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    part_id INTEGER NOT NULL REFERENCES parts(id) ON DELETE CASCADE,
    total_index INTEGER NOT NULL,
    partial_index INTEGER,
    combi_index REAL NOT NULL,
    UNIQUE (part_id, combi_index)
);

CREATE TABLE IF NOT EXISTS episode_releases (
    episode_id INTEGER NOT NULL REFERENCES episodes(id),
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    release_date TEXT NOT NULL,
    locked INTEGER NOT NULL DEFAULT 0,
    source_type TEXT,
    PRIMARY KEY (episode_id, url)
);

CREATE TABLE IF NOT EXISTS user_episodes (
    user_id TEXT NOT NULL,
    episode_id INTEGER NOT NULL REFERENCES episodes(id),
    progress REAL NOT NULL DEFAULT 0,
    read_date TEXT,
    PRIMARY KEY (user_id, episode_id)
);

CREATE TABLE IF NOT EXISTS result_episodes (
    search_key TEXT NOT NULL,
    episode_id INTEGER NOT NULL REFERENCES episodes(id),
    PRIMARY KEY (search_key, episode_id)
);

CREATE TABLE IF NOT EXISTS news (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    link TEXT NOT NULL UNIQUE,
    date TEXT NOT NULL,
    medium_id INTEGER REFERENCES media(id) ON DELETE SET NULL,
    locked INTEGER NOT NULL DEFAULT 0
);
"#;

/// Create any missing tables.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DieselError> {
    let mut conn = pool.get().await?;
    conn.batch_execute(SCHEMA).await?;
    info!(database = pool.database_url(), "Schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let dir = tempdir().unwrap();
        let pool = DbPool::from_path(&dir.path().join("test.db"));

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
    }
}
