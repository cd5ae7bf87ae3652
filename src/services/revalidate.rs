//! Remote-change revalidation and local reconciliation.
//!
//! Revalidation probes the origin for documents whose last check is older
//! than the freshness window, using stored validators. A changed document
//! is reopened (`discovered`) so the next download pass refetches it.
//! Reconciliation is the local mirror image: documents whose recorded raw
//! file vanished from disk get reopened too.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::http_client::HttpClient;
use crate::models::Document;
use crate::repository::DocumentRepository;

/// Final counters for one revalidation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevalidateSummary {
    pub checked: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub errors: usize,
}

pub struct RevalidateService {
    repo: DocumentRepository,
    user_agent: String,
    timeout: Duration,
    insecure_tls: bool,
    recheck_after_days: u64,
    limit: usize,
}

impl RevalidateService {
    pub fn new(
        repo: DocumentRepository,
        user_agent: String,
        timeout: Duration,
        insecure_tls: bool,
        recheck_after_days: u64,
        limit: usize,
    ) -> Self {
        Self {
            repo,
            user_agent,
            timeout,
            insecure_tls,
            recheck_after_days,
            limit,
        }
    }

    /// Probe stale documents against their origin.
    pub async fn revalidate(&self) -> anyhow::Result<RevalidateSummary> {
        let client = HttpClient::new(&self.user_agent, self.timeout, self.insecure_tls)?;
        let cutoff = Utc::now() - chrono::Duration::days(self.recheck_after_days as i64);
        let candidates = self.repo.list_revalidation_candidates(self.limit, cutoff)?;

        let mut summary = RevalidateSummary::default();
        for doc in &candidates {
            summary.checked += 1;
            match self.probe(&client, doc).await {
                Ok(true) => summary.unchanged += 1,
                Ok(false) => summary.changed += 1,
                Err(err) => {
                    summary.errors += 1;
                    warn!(doc_id = %doc.doc_id, url = %doc.url, %err, "revalidation probe failed");
                }
            }
        }
        info!(
            checked = summary.checked,
            unchanged = summary.unchanged,
            changed = summary.changed,
            errors = summary.errors,
            "revalidation pass finished"
        );
        Ok(summary)
    }

    /// Returns Ok(true) when the remote copy is unchanged.
    async fn probe(&self, client: &HttpClient, doc: &Document) -> anyhow::Result<bool> {
        let response = client
            .head(&doc.url, doc.etag.as_deref(), doc.last_modified.as_deref())
            .await?;

        if response.is_not_modified() {
            self.repo.mark_remote_unchanged(
                &doc.doc_id,
                response.etag(),
                response.last_modified(),
            )?;
            return Ok(true);
        }
        if response.status.as_u16() == 404 {
            // The remote copy is gone; reopen so the next download pass
            // records the terminal 404.
            debug!(doc_id = %doc.doc_id, "remote returned 404 on probe, reopening");
            self.repo.mark_remote_changed(&doc.doc_id)?;
            return Ok(false);
        }
        if !response.is_success() {
            // Any other non-success is inconclusive (origin down, auth
            // hiccup): the local copy stays authoritative, only the check
            // time moves.
            warn!(
                doc_id = %doc.doc_id,
                status = response.status.as_u16(),
                "revalidation probe got non-success status"
            );
            self.repo.mark_remote_unchanged(&doc.doc_id, None, None)?;
            return Ok(true);
        }

        let changed = match (doc.etag.as_deref(), response.etag()) {
            (Some(stored), Some(remote)) => stored != remote,
            _ => match (doc.last_modified.as_deref(), response.last_modified()) {
                (Some(stored), Some(remote)) => stored != remote,
                // no validators on either side: HEAD cannot tell, assume current
                _ => false,
            },
        };

        if changed {
            debug!(doc_id = %doc.doc_id, "remote content changed, reopening");
            self.repo.mark_remote_changed(&doc.doc_id)?;
            Ok(false)
        } else {
            self.repo.mark_remote_unchanged(
                &doc.doc_id,
                response.etag(),
                response.last_modified(),
            )?;
            Ok(true)
        }
    }

    /// Reopen every document whose recorded raw file is gone from disk.
    pub fn reconcile_local_files(&self) -> anyhow::Result<usize> {
        let docs = self.repo.list_with_raw_location()?;
        let mut missing = 0usize;
        for doc in &docs {
            let exists = doc
                .raw_location
                .as_deref()
                .map(|p| PathBuf::from(p).exists())
                .unwrap_or(false);
            if !exists {
                warn!(
                    doc_id = %doc.doc_id,
                    raw = doc.raw_location.as_deref().unwrap_or(""),
                    "raw file missing, reopening document"
                );
                self.repo.mark_raw_missing(&doc.doc_id)?;
                missing += 1;
            }
        }
        if missing > 0 {
            info!(missing, "reconciliation reopened documents");
        }
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{doc_id_for_url, DiscoveredItem, DocStatus, DownloadRecord, DownloadStatus};
    use std::path::Path;

    fn seed_downloaded(repo: &DocumentRepository, raw_path: &Path, url: &str) -> String {
        let doc_id = doc_id_for_url(url);
        repo.upsert_discovered(
            &doc_id,
            &DiscoveredItem {
                url: url.to_string(),
                title: "t".to_string(),
                year: None,
                month: None,
                source_page_url: None,
            },
        )
        .unwrap();
        repo.mark_download_result(&DownloadRecord {
            doc_id: doc_id.clone(),
            status: DownloadStatus::DownloadedOk,
            attempt: 1,
            sha256: Some("aa".to_string()),
            bytes: Some(4),
            content_type: None,
            raw_location: Some(raw_path.display().to_string()),
            etag: Some("\"e1\"".to_string()),
            last_modified: None,
            error: None,
        })
        .unwrap();
        doc_id
    }

    fn service(repo: DocumentRepository) -> RevalidateService {
        RevalidateService::new(
            repo,
            "docpipe-test".to_string(),
            Duration::from_secs(5),
            false,
            14,
            100,
        )
    }

    async fn spawn_fixed_status(status: axum::http::StatusCode) -> String {
        let app = axum::Router::new().fallback(move || async move { status });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    fn clear_check_time(repo: &DocumentRepository) {
        repo.conn()
            .unwrap()
            .execute("UPDATE documents SET last_checked_at = NULL", [])
            .unwrap();
    }

    #[tokio::test]
    async fn test_probe_404_reopens_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = DocumentRepository::new(dir.path().join("docpipe.db"));
        repo.init().unwrap();
        let base = spawn_fixed_status(axum::http::StatusCode::NOT_FOUND).await;
        let doc_id = seed_downloaded(
            &repo,
            &dir.path().join("a.pdf"),
            &format!("{base}/a.pdf"),
        );
        clear_check_time(&repo);

        let summary = service(repo.clone()).revalidate().await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.changed, 1);
        let doc = repo.get(&doc_id).unwrap().unwrap();
        assert_eq!(doc.last_status, Some(DocStatus::Discovered));
        assert_eq!(doc.error.as_deref(), Some("remote_changed"));
    }

    #[tokio::test]
    async fn test_probe_server_error_is_inconclusive() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = DocumentRepository::new(dir.path().join("docpipe.db"));
        repo.init().unwrap();
        let base = spawn_fixed_status(axum::http::StatusCode::SERVICE_UNAVAILABLE).await;
        let doc_id = seed_downloaded(
            &repo,
            &dir.path().join("a.pdf"),
            &format!("{base}/a.pdf"),
        );
        clear_check_time(&repo);

        let summary = service(repo.clone()).revalidate().await.unwrap();
        assert_eq!(summary.unchanged, 1);
        let doc = repo.get(&doc_id).unwrap().unwrap();
        assert_eq!(doc.last_status, Some(DocStatus::DownloadedOk));
        assert!(doc.last_checked_at.is_some());
    }

    #[test]
    fn test_reconcile_reopens_only_missing_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = DocumentRepository::new(dir.path().join("docpipe.db"));
        repo.init().unwrap();

        let present = dir.path().join("present.pdf");
        std::fs::write(&present, b"data").unwrap();
        let kept = seed_downloaded(&repo, &present, "https://x/present.pdf");
        let gone = seed_downloaded(
            &repo,
            &dir.path().join("gone.pdf"),
            "https://x/gone.pdf",
        );

        let missing = service(repo.clone()).reconcile_local_files().unwrap();
        assert_eq!(missing, 1);
        assert_eq!(
            repo.get(&kept).unwrap().unwrap().last_status,
            Some(DocStatus::DownloadedOk)
        );
        let reopened = repo.get(&gone).unwrap().unwrap();
        assert_eq!(reopened.last_status, Some(DocStatus::Discovered));
        assert_eq!(reopened.raw_location, None);
    }
}
