//! Listing-page discovery.
//!
//! Walks a paginated listing site, harvests document links, and upserts
//! them into the store. Parsing is deliberately thin: a CSS selector for
//! item anchors and one for the next-page link. Everything downstream
//! only sees `DiscoveredItem` tuples, so other discovery sources can be
//! swapped in behind [`DiscoverySource`].

use std::collections::HashSet;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::http_client::HttpClient;
use crate::models::{doc_id_for_url, DiscoveredItem};
use crate::repository::DocumentRepository;
use crate::sink::Sink;

/// Listing site configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    /// First listing page.
    pub start_url: String,
    /// CSS selector matching document anchors.
    pub item_selector: String,
    /// CSS selector matching the next-page anchor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_selector: Option<String>,
    /// Page ceiling for one discovery pass.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_max_pages() -> usize {
    200
}

/// One parsed listing page.
#[derive(Debug, Clone)]
pub struct DiscoveryPage {
    pub items: Vec<DiscoveredItem>,
    pub next_page: Option<String>,
}

/// Anything that can produce document links page by page.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn fetch_page(&self, page_url: &str) -> anyhow::Result<DiscoveryPage>;
}

/// HTML listing source driven by CSS selectors.
pub struct HtmlListingSource {
    client: HttpClient,
    config: ListingConfig,
}

impl HtmlListingSource {
    pub fn new(client: HttpClient, config: ListingConfig) -> anyhow::Result<Self> {
        // Fail early on unparsable selectors instead of per page.
        parse_selector(&config.item_selector)?;
        if let Some(next) = &config.next_selector {
            parse_selector(next)?;
        }
        Ok(Self { client, config })
    }
}

fn parse_selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector '{css}': {e}"))
}

#[async_trait]
impl DiscoverySource for HtmlListingSource {
    async fn fetch_page(&self, page_url: &str) -> anyhow::Result<DiscoveryPage> {
        let body = self.client.get_text(page_url).await?;
        let base = Url::parse(page_url)?;

        let document = Html::parse_document(&body);
        let item_selector = parse_selector(&self.config.item_selector)?;
        let mut items = Vec::new();
        for element in document.select(&item_selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Ok(url) = base.join(href) else {
                warn!(%page_url, href, "skipping unresolvable listing link");
                continue;
            };
            let title = element.text().collect::<String>().trim().to_string();
            let (year, month) = year_month_from_url(url.path());
            items.push(DiscoveredItem {
                url: url.to_string(),
                title,
                year,
                month,
                source_page_url: Some(page_url.to_string()),
            });
        }

        let next_page = match &self.config.next_selector {
            Some(css) => {
                let next_selector = parse_selector(css)?;
                document
                    .select(&next_selector)
                    .find_map(|e| e.value().attr("href"))
                    .and_then(|href| base.join(href).ok())
                    .map(|u| u.to_string())
            }
            None => None,
        };

        Ok(DiscoveryPage { items, next_page })
    }
}

/// Pull `/YYYY/MM/` style segments out of a URL path, if present.
fn year_month_from_url(path: &str) -> (Option<i32>, Option<i32>) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for window in segments.windows(2) {
        if let (Ok(year), Ok(month)) = (window[0].parse::<i32>(), window[1].parse::<i32>()) {
            if (1900..=2200).contains(&year) && (1..=12).contains(&month) {
                return (Some(year), Some(month));
            }
        }
    }
    let year = segments
        .iter()
        .find_map(|s| s.parse::<i32>().ok().filter(|y| (1900..=2200).contains(y)));
    (year, None)
}

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoverySummary {
    pub pages: usize,
    pub discovered: usize,
    pub new: usize,
}

/// Drives pagination and records everything found.
pub struct DiscoveryService<'a> {
    source: &'a dyn DiscoverySource,
    repo: &'a DocumentRepository,
    sink: &'a dyn Sink,
    max_pages: usize,
}

impl<'a> DiscoveryService<'a> {
    pub fn new(
        source: &'a dyn DiscoverySource,
        repo: &'a DocumentRepository,
        sink: &'a dyn Sink,
        max_pages: usize,
    ) -> Self {
        Self {
            source,
            repo,
            sink,
            max_pages,
        }
    }

    pub async fn run(&self, start_url: &str) -> anyhow::Result<DiscoverySummary> {
        let mut summary = DiscoverySummary::default();
        let mut seen_pages: HashSet<String> = HashSet::new();
        let mut seen_docs: HashSet<String> = HashSet::new();
        let mut current = start_url.to_string();

        while summary.pages < self.max_pages {
            if !seen_pages.insert(current.clone()) {
                warn!(page = %current, "pagination loop detected, stopping");
                break;
            }
            debug!(page = %current, "fetching listing page");
            let page = self.source.fetch_page(&current).await?;
            summary.pages += 1;

            let mut batch = Vec::new();
            for item in page.items {
                let doc_id = doc_id_for_url(&item.url);
                if !seen_docs.insert(doc_id.clone()) {
                    continue;
                }
                let inserted = self.repo.upsert_discovered(&doc_id, &item)?;
                summary.discovered += 1;
                if inserted {
                    summary.new += 1;
                }
                batch.push(item);
            }
            if !batch.is_empty() {
                self.sink.publish_discovered(&batch).await?;
            }

            match page.next_page {
                Some(next) => current = next,
                None => break,
            }
        }

        info!(
            pages = summary.pages,
            discovered = summary.discovered,
            new = summary.new,
            "discovery pass finished"
        );
        Ok(summary)
    }
}
