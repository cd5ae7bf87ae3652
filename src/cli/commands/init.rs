//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::queue::SqliteQueue;
use crate::repository::{DocumentRepository, JobRepository, RunRepository};

/// Initialize the data directory and databases.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let db_path = settings.database_path();
    DocumentRepository::new(&db_path).init()?;
    JobRepository::new(&db_path).init()?;
    RunRepository::new(&db_path).init()?;
    SqliteQueue::new(settings.queue_db_path(), settings.lease_secs.max(1) as u64).init()?;

    println!(
        "{} Initialized docpipe in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    if settings.listing.is_none() {
        println!(
            "{} No [listing] section configured; `discover` will need --start-url",
            style("!").yellow()
        );
    }
    Ok(())
}
