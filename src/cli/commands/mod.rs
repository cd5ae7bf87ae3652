//! Command implementations.

pub mod discover;
pub mod download;
pub mod extract;
pub mod init;
pub mod jobs;
pub mod revalidate;
pub mod serve;
pub mod status;

use std::sync::Arc;

use crate::config::Settings;
use crate::queue::{AsyncTableQueue, HttpQueue, SqliteQueue};

/// Pick the queue backend from configuration: a remote HTTP queue when
/// `queue_url` is set, the local SQLite queue otherwise.
pub(crate) fn build_queue(settings: &Settings) -> anyhow::Result<Arc<dyn AsyncTableQueue>> {
    match settings.queue_url.as_deref() {
        Some(url) => {
            let queue = HttpQueue::new(
                url,
                settings.queue_token.clone(),
                settings.queue_timeout_secs,
                settings.insecure_tls,
            )?;
            Ok(Arc::new(queue))
        }
        None => {
            let queue = SqliteQueue::new(
                settings.queue_db_path(),
                settings.lease_secs.max(1) as u64,
            );
            queue.init()?;
            Ok(Arc::new(queue))
        }
    }
}
