//! Extract command.

use std::sync::Arc;

use console::style;

use crate::config::Settings;
use crate::extractors::{NoopTableExtractor, PdftotextExtractor};
use crate::repository::DocumentRepository;
use crate::services::{ExtractConfig, ExtractService};
use crate::sink::sink_from_spec;

pub async fn cmd_extract(
    settings: &Settings,
    limit: Option<usize>,
    force: bool,
) -> anyhow::Result<()> {
    if !PdftotextExtractor::available() {
        anyhow::bail!("pdftotext not found on PATH (install poppler-utils)");
    }

    settings.ensure_directories()?;
    let repo = DocumentRepository::new(settings.database_path());
    repo.init()?;
    let sink = sink_from_spec(settings.sink.as_deref(), &settings.data_dir)?;

    let service = ExtractService::new(
        repo,
        Arc::new(PdftotextExtractor),
        Arc::new(NoopTableExtractor),
        ExtractConfig {
            extracted_dir: settings.extracted_dir.clone(),
            concurrency: settings.extract_concurrency,
            max_attempts: settings.max_extract_attempts,
            force,
            limit,
        },
    );

    let summary = service.run(sink.as_ref()).await?;
    println!(
        "{} Extracted {}, failed {}, reopened {} (raw file missing)",
        style("✓").green(),
        summary.extracted,
        summary.failed,
        summary.raw_missing
    );
    Ok(())
}
