//! HTTP facade over the SQLite queue.
//!
//! Lets the out-of-process table worker reach the queue without sharing the
//! database file. The protocol mirrors [`crate::queue::HttpQueue`] on the
//! client side: publish, lease, ack, plus a health probe.

mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::queue::SqliteQueue;

/// Shared state for the queue server.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<SqliteQueue>,
    /// When set, every request must carry `Authorization: Bearer <token>`.
    pub token: Option<String>,
}

/// Start the queue server.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let queue = SqliteQueue::new(settings.queue_db_path(), settings.lease_secs.max(1) as u64);
    queue.init()?;
    let state = AppState {
        queue: Arc::new(queue),
        token: settings.queue_token.clone(),
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting queue server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
