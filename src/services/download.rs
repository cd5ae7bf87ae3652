//! Download stage runner.
//!
//! Claims eligible documents in batches, fans them out across a small
//! worker pool, and drives a bounded attempt loop per document. Every
//! terminal outcome lands in the store before the runner moves on, so a
//! crash mid-run loses at most the in-flight documents' current attempt.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::http_client::{HttpClient, HttpError};
use crate::models::{Document, DownloadRecord, DownloadStatus, PERMANENT_404_MARKER};
use crate::repository::DocumentRepository;
use crate::sink::Sink;

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 10_000;

/// Configuration for the download stage.
pub struct DownloadConfig {
    pub raw_dir: PathBuf,
    pub user_agent: String,
    pub timeout: Duration,
    pub insecure_tls: bool,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub force: bool,
    pub limit: Option<usize>,
}

/// Final counters for one download pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// How one attempt ended.
enum AttemptOutcome {
    Done(DownloadRecord),
    /// Worth another try after backoff.
    Retry(String),
    /// Never worth retrying; recorded as-is.
    Permanent(String),
}

pub struct DownloadService {
    repo: DocumentRepository,
    config: DownloadConfig,
}

impl DownloadService {
    pub fn new(repo: DocumentRepository, config: DownloadConfig) -> Self {
        Self { repo, config }
    }

    /// Run the download stage to completion.
    pub async fn run(&self, sink: &dyn Sink) -> anyhow::Result<DownloadSummary> {
        let client = HttpClient::new(
            &self.config.user_agent,
            self.config.timeout,
            self.config.insecure_tls,
        )?;
        let concurrency = self.config.concurrency.max(1);
        let batch_size = (concurrency * 2).max(1);

        let downloaded = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        // Documents already handled this run. Failed documents can stay
        // eligible in the store, so without this a flaky URL would be
        // retried forever within a single pass.
        let mut seen: HashSet<String> = HashSet::new();
        let mut processed = 0usize;

        loop {
            if let Some(limit) = self.config.limit {
                if processed >= limit {
                    break;
                }
            }
            let mut batch = self.repo.list_pending_downloads(
                batch_size + seen.len(),
                self.config.max_attempts,
                self.config.force,
            )?;
            batch.retain(|doc| !seen.contains(&doc.doc_id));
            let mut cap = batch_size;
            if let Some(limit) = self.config.limit {
                cap = cap.min(limit - processed);
            }
            batch.truncate(cap);
            if batch.is_empty() {
                break;
            }
            for doc in &batch {
                seen.insert(doc.doc_id.clone());
            }
            processed += batch.len();

            // Work-stealing pool: workers pull the next index until the
            // batch is drained.
            let batch = Arc::new(batch);
            let next = Arc::new(AtomicUsize::new(0));
            let mut handles = Vec::with_capacity(concurrency);
            for worker_id in 0..concurrency.min(batch.len()) {
                let batch = batch.clone();
                let next = next.clone();
                let client = client.clone();
                let repo = self.repo.clone();
                let raw_dir = self.config.raw_dir.clone();
                let max_attempts = self.config.max_attempts;
                let downloaded = downloaded.clone();
                let skipped = skipped.clone();
                let failed = failed.clone();

                handles.push(tokio::spawn(async move {
                    let mut records = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(doc) = batch.get(index) else {
                            break;
                        };
                        debug!(worker_id, doc_id = %doc.doc_id, url = %doc.url, "downloading");
                        let record =
                            download_one(&client, &raw_dir, doc, max_attempts).await;
                        match record.status {
                            DownloadStatus::DownloadedOk => {
                                downloaded.fetch_add(1, Ordering::Relaxed);
                            }
                            DownloadStatus::Skipped => {
                                skipped.fetch_add(1, Ordering::Relaxed);
                            }
                            DownloadStatus::DownloadFailed => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                warn!(
                                    doc_id = %doc.doc_id,
                                    url = %doc.url,
                                    error = record.error.as_deref().unwrap_or("unknown"),
                                    "download failed"
                                );
                            }
                        }
                        // A store write failure is systemic: stop rather
                        // than let persisted state drift from the summary.
                        repo.mark_download_result(&record)?;
                        records.push(record);
                    }
                    Ok::<_, crate::repository::RepositoryError>(records)
                }));
            }

            let mut records = Vec::new();
            for handle in handles {
                records.extend(handle.await??);
            }
            if let Err(err) = sink.publish_download_results(&records).await {
                warn!(%err, "sink rejected download results");
            }
        }

        let summary = DownloadSummary {
            downloaded: downloaded.load(Ordering::Relaxed),
            skipped: skipped.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
        };
        info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            "download pass finished"
        );
        Ok(summary)
    }
}

/// Run the bounded attempt loop for one document.
async fn download_one(
    client: &HttpClient,
    raw_dir: &Path,
    doc: &Document,
    max_attempts: u32,
) -> DownloadRecord {
    let mut attempt = doc.attempts_download;
    loop {
        attempt += 1;
        match attempt_download(client, raw_dir, doc, attempt).await {
            AttemptOutcome::Done(record) => return record,
            AttemptOutcome::Permanent(error) => {
                return DownloadRecord::failed(&doc.doc_id, attempt, error);
            }
            AttemptOutcome::Retry(error) => {
                if attempt >= max_attempts {
                    return DownloadRecord::failed(&doc.doc_id, attempt, error);
                }
                let backoff = backoff_ms(attempt);
                debug!(doc_id = %doc.doc_id, attempt, backoff, error, "retrying download");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }
    }
}

async fn attempt_download(
    client: &HttpClient,
    raw_dir: &Path,
    doc: &Document,
    attempt: u32,
) -> AttemptOutcome {
    // Only send validators when the stored file actually exists on disk;
    // a 304 against a missing file would strand the document.
    let has_local_file = doc
        .raw_location
        .as_deref()
        .map(|p| Path::new(p).exists())
        .unwrap_or(false);
    let (etag, last_modified) = if has_local_file {
        (doc.etag.as_deref(), doc.last_modified.as_deref())
    } else {
        (None, None)
    };

    let response = match client.get(&doc.url, etag, last_modified).await {
        Ok(response) => response,
        Err(err) => return AttemptOutcome::Retry(format!("network: {err}")),
    };

    if response.is_not_modified() {
        return AttemptOutcome::Done(DownloadRecord {
            doc_id: doc.doc_id.clone(),
            status: DownloadStatus::Skipped,
            attempt,
            sha256: None,
            bytes: None,
            content_type: None,
            raw_location: None,
            etag: response.etag().map(str::to_string),
            last_modified: response.last_modified().map(str::to_string),
            error: None,
        });
    }

    let status = response.status.as_u16();
    if !response.is_success() {
        return match status {
            404 => AttemptOutcome::Permanent(format!("{}: {}", PERMANENT_404_MARKER, doc.url)),
            429 => AttemptOutcome::Retry("http_429".to_string()),
            400..=499 => AttemptOutcome::Permanent(format!("http_{status}")),
            _ => AttemptOutcome::Retry(format!("http_{status}")),
        };
    }

    let content_type = response.content_type().map(str::to_string);
    let etag = response.etag().map(str::to_string);
    let last_modified = response.last_modified().map(str::to_string);

    let dest = raw_dir.join(raw_filename(&doc.doc_id, &doc.url));
    match client.download_to_file(response, &dest).await {
        Ok(file) => AttemptOutcome::Done(DownloadRecord {
            doc_id: doc.doc_id.clone(),
            status: DownloadStatus::DownloadedOk,
            attempt,
            sha256: Some(file.sha256),
            bytes: Some(file.bytes),
            content_type,
            raw_location: Some(dest.display().to_string()),
            etag,
            last_modified,
            error: None,
        }),
        Err(HttpError::Request(err)) => AttemptOutcome::Retry(format!("network: {err}")),
        Err(HttpError::Io(err)) => AttemptOutcome::Retry(format!("io: {err}")),
    }
}

/// Raw file name: deterministic per document, extension carried over from
/// the URL when it has one.
fn raw_filename(doc_id: &str, url: &str) -> String {
    let ext = url::Url::parse(url)
        .ok()
        .filter(|u| !u.path().ends_with('/'))
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_string)
        })
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{doc_id}.{}", ext.to_ascii_lowercase()),
        None => format!("{doc_id}.bin"),
    }
}

fn backoff_ms(attempt: u32) -> u64 {
    BACKOFF_BASE_MS
        .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16))
        .min(BACKOFF_CAP_MS)
}
