//! Synchronous extract stage runner.
//!
//! Text extraction is the gating step: a document reaches `extracted_ok`
//! only when text lands on disk. Table extraction here is best-effort;
//! the real table work normally runs out of process via the async
//! orchestrator.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::extractors::{TableExtractor, TextExtractor};
use crate::models::{Document, ExtractionRecord, ExtractionStatus};
use crate::repository::DocumentRepository;
use crate::sink::Sink;

/// Configuration for the extract stage.
pub struct ExtractConfig {
    pub extracted_dir: PathBuf,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub force: bool,
    pub limit: Option<usize>,
}

/// Final counters for one extract pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractSummary {
    pub extracted: usize,
    pub failed: usize,
    /// Documents whose recorded raw file was gone; reopened for redownload.
    pub raw_missing: usize,
}

pub struct ExtractService {
    repo: DocumentRepository,
    text: Arc<dyn TextExtractor>,
    tables: Arc<dyn TableExtractor>,
    config: ExtractConfig,
}

impl ExtractService {
    pub fn new(
        repo: DocumentRepository,
        text: Arc<dyn TextExtractor>,
        tables: Arc<dyn TableExtractor>,
        config: ExtractConfig,
    ) -> Self {
        Self {
            repo,
            text,
            tables,
            config,
        }
    }

    /// Run the extract stage to completion.
    pub async fn run(&self, sink: &dyn Sink) -> anyhow::Result<ExtractSummary> {
        let concurrency = self.config.concurrency.max(1);
        let batch_size = (concurrency * 2).max(1);

        let extracted = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let raw_missing = Arc::new(AtomicUsize::new(0));

        let mut seen: HashSet<String> = HashSet::new();
        let mut processed = 0usize;

        loop {
            if let Some(limit) = self.config.limit {
                if processed >= limit {
                    break;
                }
            }
            let mut batch = self.repo.list_pending_extracts(
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

            let batch = Arc::new(batch);
            let next = Arc::new(AtomicUsize::new(0));
            let mut handles = Vec::with_capacity(concurrency);
            for worker_id in 0..concurrency.min(batch.len()) {
                let batch = batch.clone();
                let next = next.clone();
                let repo = self.repo.clone();
                let text = self.text.clone();
                let tables = self.tables.clone();
                let extracted_dir = self.config.extracted_dir.clone();
                let extracted = extracted.clone();
                let failed = failed.clone();
                let raw_missing = raw_missing.clone();

                handles.push(tokio::spawn(async move {
                    let mut records = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(doc) = batch.get(index) else {
                            break;
                        };
                        debug!(worker_id, doc_id = %doc.doc_id, "extracting");

                        let raw_path = doc.raw_location.as_deref().map(Path::new);
                        let Some(raw_path) = raw_path.filter(|p| p.exists()) else {
                            // the eligibility query guarantees raw_location
                            // is set; the file itself may still have vanished
                            raw_missing.fetch_add(1, Ordering::Relaxed);
                            warn!(doc_id = %doc.doc_id, "raw file missing, reopening document");
                            repo.mark_raw_missing(&doc.doc_id)?;
                            continue;
                        };

                        let record =
                            extract_one(text.as_ref(), tables.as_ref(), &extracted_dir, doc, raw_path)
                                .await;
                        match record.status {
                            ExtractionStatus::ExtractedOk => {
                                extracted.fetch_add(1, Ordering::Relaxed);
                            }
                            ExtractionStatus::ExtractedFailed => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                warn!(
                                    doc_id = %doc.doc_id,
                                    error = record.error.as_deref().unwrap_or("unknown"),
                                    "extraction failed"
                                );
                            }
                        }
                        // A store write failure is systemic: stop rather
                        // than let persisted state drift from the summary.
                        repo.mark_extraction_result(&record)?;
                        records.push(record);
                    }
                    Ok::<_, crate::repository::RepositoryError>(records)
                }));
            }

            let mut records = Vec::new();
            for handle in handles {
                records.extend(handle.await??);
            }
            if let Err(err) = sink.publish_extraction_results(&records).await {
                warn!(%err, "sink rejected extraction results");
            }
        }

        let summary = ExtractSummary {
            extracted: extracted.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
            raw_missing: raw_missing.load(Ordering::Relaxed),
        };
        info!(
            extracted = summary.extracted,
            failed = summary.failed,
            raw_missing = summary.raw_missing,
            "extract pass finished"
        );
        Ok(summary)
    }
}

async fn extract_one(
    text: &dyn TextExtractor,
    tables: &dyn TableExtractor,
    extracted_dir: &Path,
    doc: &Document,
    raw_path: &Path,
) -> ExtractionRecord {
    let attempt = doc.attempts_extract + 1;

    let extracted = match text.extract(raw_path).await {
        Ok(extracted) => extracted,
        Err(err) => {
            return ExtractionRecord {
                doc_id: doc.doc_id.clone(),
                status: ExtractionStatus::ExtractedFailed,
                attempt,
                text_location: None,
                tables_location: None,
                error: Some(err.to_string()),
            };
        }
    };

    let text_path = extracted_dir.join(format!("{}.txt", doc.doc_id));
    if let Err(err) = write_text(&text_path, &extracted.text).await {
        return ExtractionRecord {
            doc_id: doc.doc_id.clone(),
            status: ExtractionStatus::ExtractedFailed,
            attempt,
            text_location: None,
            tables_location: None,
            error: Some(format!("write failed: {err}")),
        };
    }
    debug!(
        doc_id = %doc.doc_id,
        pages = extracted.page_count,
        "text extracted"
    );

    // Tables are best-effort in the sync path; a failure here never blocks
    // the document.
    let tables_location = match tables.extract(&doc.doc_id, raw_path).await {
        Ok(outcome) => {
            if let Some(note) = outcome.note {
                debug!(doc_id = %doc.doc_id, note, "table extraction note");
            }
            outcome.location
        }
        Err(err) => {
            warn!(doc_id = %doc.doc_id, %err, "table extraction failed, continuing");
            None
        }
    };

    ExtractionRecord {
        doc_id: doc.doc_id.clone(),
        status: ExtractionStatus::ExtractedOk,
        attempt,
        text_location: Some(text_path.display().to_string()),
        tables_location,
        error: None,
    }
}

async fn write_text(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, text).await
}
