//! Database management commands.

use console::style;

use crate::config::Config;
use crate::daemon::open_database;

/// Create any missing tables.
pub async fn cmd_migrate(config: &Config) -> anyhow::Result<()> {
    println!("{} Database migration", style("→").cyan());
    let pool = open_database(config).await?;
    println!(
        "{} Schema ready in {}",
        style("✓").green(),
        pool.database_url()
    );
    Ok(())
}
