//! Aggregate counts for the status command.

use serde::Serialize;

use crate::repository::Result;

use super::DocumentRepository;

/// Per-status document counts plus a grand total.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub discovered: u64,
    pub downloaded_ok: u64,
    pub download_failed: u64,
    pub extracted_ok: u64,
    pub extracted_failed: u64,
    pub permanent_404: u64,
}

impl DocumentRepository {
    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let mut stats = StoreStats::default();
        let mut stmt = conn.prepare(
            "SELECT COALESCE(last_status, 'discovered'), COUNT(*) \
             FROM documents GROUP BY COALESCE(last_status, 'discovered')",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            stats.total += count;
            match status.as_str() {
                "discovered" => stats.discovered += count,
                "downloaded_ok" => stats.downloaded_ok += count,
                "download_failed" => stats.download_failed += count,
                "extracted_ok" => stats.extracted_ok += count,
                "extracted_failed" => stats.extracted_failed += count,
                _ => {}
            }
        }
        stats.permanent_404 = conn.query_row(
            "SELECT COUNT(*) FROM documents \
             WHERE last_status = 'download_failed' AND error LIKE '%http_404%'",
            [],
            |row| row.get(0),
        )?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{doc_id_for_url, DiscoveredItem, DownloadRecord};
    use tempfile::TempDir;

    #[test]
    fn test_stats_count_by_status() {
        let dir = TempDir::new().unwrap();
        let repo = DocumentRepository::new(dir.path().join("docpipe.db"));
        repo.init().unwrap();

        for url in ["https://s/a.pdf", "https://s/b.pdf", "https://s/c.pdf"] {
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
        }
        let gone = doc_id_for_url("https://s/c.pdf");
        repo.mark_download_result(&DownloadRecord::failed(&gone, 1, "http_404: https://s/c.pdf"))
            .unwrap();

        let stats = repo.get_stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.download_failed, 1);
        assert_eq!(stats.permanent_404, 1);
    }
}
