//! Download command.

use std::time::Duration;

use console::style;

use crate::config::Settings;
use crate::repository::DocumentRepository;
use crate::services::{DownloadConfig, DownloadService};
use crate::sink::sink_from_spec;

pub async fn cmd_download(
    settings: &Settings,
    limit: Option<usize>,
    force: bool,
) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let repo = DocumentRepository::new(settings.database_path());
    repo.init()?;
    let sink = sink_from_spec(settings.sink.as_deref(), &settings.data_dir)?;

    let service = DownloadService::new(
        repo,
        DownloadConfig {
            raw_dir: settings.raw_dir.clone(),
            user_agent: settings.user_agent.clone(),
            timeout: Duration::from_secs(settings.download_timeout_secs),
            insecure_tls: settings.insecure_tls,
            concurrency: settings.download_concurrency,
            max_attempts: settings.max_download_attempts,
            force,
            limit,
        },
    );

    let summary = service.run(sink.as_ref()).await?;
    println!(
        "{} Downloaded {}, skipped {} (unchanged), failed {}",
        style("✓").green(),
        summary.downloaded,
        summary.skipped,
        summary.failed
    );
    // per-document failures are recorded in the store, not fatal
    Ok(())
}
