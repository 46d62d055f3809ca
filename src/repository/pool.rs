//! Connections to the tocwatch SQLite file.
//!
//! Each repository call opens its own connection; diesel-async's
//! `SyncConnectionWrapper` moves the blocking sqlite calls off the runtime.

use std::path::Path;

use diesel::result::DatabaseErrorKind;
use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};

pub type DieselError = diesel::result::Error;

pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// The daemon's workers and a CLI invocation may write concurrently.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// Where to connect; cloned into every repository.
#[derive(Debug, Clone)]
pub struct DbPool {
    database_url: String,
}

impl DbPool {
    /// Accepts a bare path or a `sqlite:` / `sqlite://` URL.
    pub fn new(database_url: &str) -> Self {
        let path = ["sqlite://", "sqlite:"]
            .iter()
            .find_map(|scheme| database_url.strip_prefix(scheme))
            .unwrap_or(database_url);
        Self {
            database_url: path.to_string(),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.display().to_string())
    }

    pub async fn get(&self) -> Result<SqliteConn, DieselError> {
        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(|e| {
                DieselError::DatabaseError(DatabaseErrorKind::Unknown, Box::new(e.to_string()))
            })?;
        conn.batch_execute(CONNECTION_PRAGMAS).await?;
        Ok(conn)
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// Run a block with a fresh connection bound to `$conn`.
///
/// ```ignore
/// with_conn!(self.pool, conn, {
///     jobs::table.load::<JobRecord>(&mut conn).await
/// })
/// ```
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident, $body:block) => {{
        #[allow(unused_mut)]
        let mut $conn = $pool.get().await?;
        $body
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_prefix_stripped() {
        assert_eq!(DbPool::new("sqlite:/tmp/a.db").database_url(), "/tmp/a.db");
        assert_eq!(DbPool::new("sqlite:///tmp/a.db").database_url(), "/tmp/a.db");
        assert_eq!(DbPool::new("/tmp/a.db").database_url(), "/tmp/a.db");
    }
}
