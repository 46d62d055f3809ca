//! Daemon command.

use console::style;

use crate::config::Config;
use crate::daemon::Daemon;
use crate::scrapers::HookRegistry;

pub async fn cmd_run(config: &Config) -> anyhow::Result<()> {
    if let Some(path) = &config.source_path {
        println!("{} Config: {}", style("→").dim(), path.display());
    }
    let daemon = Daemon::build(config, HookRegistry::new()).await?;
    println!(
        "{} Scheduler running (max {} active jobs), ctrl-c to stop",
        style("→").cyan(),
        config.scheduler.max_active
    );
    daemon.run(config).await?;
    println!("{} Stopped", style("✓").green());
    Ok(())
}
