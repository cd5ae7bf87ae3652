//! Async table-extraction queue.
//!
//! Two logical queues connect the pipeline to the out-of-process table
//! worker: `requests` (pipeline to worker) and `results` (worker back to
//! pipeline). Delivery is at-least-once with visibility leases: a consumed
//! message stays leased until acked, and an expired lease makes it
//! deliverable again. Consumers are expected to be idempotent.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

mod http;
mod sqlite;

pub use http::HttpQueue;
pub use sqlite::SqliteQueue;

/// Which of the two queues an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Requests,
    Results,
}

impl QueueKind {
    pub fn table(&self) -> &'static str {
        match self {
            QueueKind::Requests => "queue_requests",
            QueueKind::Results => "queue_results",
        }
    }

    pub fn path_segment(&self) -> &'static str {
        match self {
            QueueKind::Requests => "requests",
            QueueKind::Results => "results",
        }
    }
}

/// A leased message: transport-level id plus the opaque payload.
#[derive(Debug, Clone)]
pub struct QueueEnvelope {
    pub queue_message_id: String,
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(#[from] crate::repository::RepositoryError),
    #[error("queue transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("queue payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("queue server returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Transport-agnostic queue operations.
#[async_trait]
pub trait AsyncTableQueue: Send + Sync {
    /// Append a message. Returns the transport-assigned message id.
    async fn publish(&self, kind: QueueKind, payload: &Value) -> Result<String>;

    /// Lease up to `limit` deliverable messages.
    async fn consume(&self, kind: QueueKind, limit: usize) -> Result<Vec<QueueEnvelope>>;

    /// Permanently remove acked messages. Unknown ids are ignored.
    async fn ack(&self, kind: QueueKind, ids: &[String]) -> Result<()>;
}
