//! Revalidate command.

use std::time::Duration;

use console::style;

use crate::config::Settings;
use crate::repository::DocumentRepository;
use crate::services::RevalidateService;

pub async fn cmd_revalidate(
    settings: &Settings,
    reconcile: bool,
    limit: usize,
) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let repo = DocumentRepository::new(settings.database_path());
    repo.init()?;

    let service = RevalidateService::new(
        repo,
        settings.user_agent.clone(),
        Duration::from_secs(settings.listing_timeout_secs),
        settings.insecure_tls,
        settings.recheck_after_days,
        limit,
    );

    if reconcile {
        let missing = service.reconcile_local_files()?;
        println!(
            "{} Reconciliation reopened {} documents with missing raw files",
            style("✓").green(),
            missing
        );
    }

    let summary = service.revalidate().await?;
    println!(
        "{} Checked {}: {} unchanged, {} changed (reopened), {} errors",
        style("✓").green(),
        summary.checked,
        summary.unchanged,
        summary.changed,
        summary.errors
    );
    Ok(())
}
