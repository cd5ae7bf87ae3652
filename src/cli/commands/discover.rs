//! Discover command.

use std::time::Duration;

use console::style;

use crate::config::Settings;
use crate::discovery::{DiscoveryService, HtmlListingSource};
use crate::http_client::HttpClient;
use crate::repository::DocumentRepository;
use crate::sink::sink_from_spec;

pub async fn cmd_discover(
    settings: &Settings,
    start_url: Option<String>,
    max_pages: Option<usize>,
) -> anyhow::Result<()> {
    let Some(mut listing) = settings.listing.clone() else {
        anyhow::bail!(
            "no [listing] section configured; add one to the config file \
             (start_url, item_selector, next_selector)"
        );
    };
    if let Some(url) = start_url {
        listing.start_url = url;
    }
    if let Some(pages) = max_pages {
        listing.max_pages = pages;
    }

    settings.ensure_directories()?;
    let repo = DocumentRepository::new(settings.database_path());
    repo.init()?;
    let sink = sink_from_spec(settings.sink.as_deref(), &settings.data_dir)?;

    let client = HttpClient::new(
        &settings.user_agent,
        Duration::from_secs(settings.listing_timeout_secs),
        settings.insecure_tls,
    )?;
    let start = listing.start_url.clone();
    let max_pages = listing.max_pages;
    let source = HtmlListingSource::new(client, listing)?;
    let service = DiscoveryService::new(&source, &repo, sink.as_ref(), max_pages);

    let summary = service.run(&start).await?;
    println!(
        "{} Discovered {} documents ({} new) across {} pages",
        style("✓").green(),
        summary.discovered,
        summary.new,
        summary.pages
    );
    Ok(())
}
