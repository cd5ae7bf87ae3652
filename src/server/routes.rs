//! Router and handlers for the queue protocol.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::queue::{AsyncTableQueue, QueueError, QueueKind};

use super::AppState;

const MAX_LEASE_LIMIT: usize = 100;

type HandlerError = (StatusCode, Json<Value>);

/// Create the queue router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/queue/:kind", post(publish))
        .route("/v1/queue/:kind/lease", post(lease))
        .route("/v1/queue/:kind/ack", post(ack))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LeaseBody {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AckBody {
    ids: Vec<String>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn publish(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, HandlerError> {
    authorize(&state, &headers)?;
    let kind = parse_kind(&kind)?;
    let message_id = state
        .queue
        .publish(kind, &payload)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "queueMessageId": message_id })))
}

async fn lease(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(body): Json<LeaseBody>,
) -> Result<Json<Value>, HandlerError> {
    authorize(&state, &headers)?;
    let kind = parse_kind(&kind)?;
    let limit = body.limit.unwrap_or(1).clamp(1, MAX_LEASE_LIMIT);
    let messages = state.queue.consume(kind, limit).await.map_err(internal)?;
    let messages: Vec<Value> = messages
        .into_iter()
        .map(|m| {
            json!({
                "queueMessageId": m.queue_message_id,
                "payload": m.payload,
            })
        })
        .collect();
    Ok(Json(json!({ "messages": messages })))
}

async fn ack(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AckBody>,
) -> Result<Json<Value>, HandlerError> {
    authorize(&state, &headers)?;
    let kind = parse_kind(&kind)?;
    state
        .queue
        .ack(kind, &body.ids)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "acked": body.ids.len() })))
}

fn parse_kind(kind: &str) -> Result<QueueKind, HandlerError> {
    match kind {
        "requests" => Ok(QueueKind::Requests),
        "results" => Ok(QueueKind::Results),
        other => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown queue '{other}'") })),
        )),
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), HandlerError> {
    let Some(expected) = &state.token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing or invalid bearer token" })),
        ))
    }
}

fn internal(err: QueueError) -> HandlerError {
    error!(%err, "queue operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::queue::{HttpQueue, SqliteQueue};

    use super::*;

    async fn spawn_server(token: Option<&str>) -> (tempfile::TempDir, String) {
        let dir = tempfile::TempDir::new().unwrap();
        let queue = SqliteQueue::new(dir.path().join("async-queue.db"), 120);
        queue.init().unwrap();
        let state = AppState {
            queue: Arc::new(queue),
            token: token.map(str::to_string),
        };
        let app = create_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (dir, format!("http://{addr}"))
    }

    #[tokio::test]
    async fn test_publish_lease_ack_round_trip() {
        let (_dir, base) = spawn_server(None).await;
        let client = HttpQueue::new(&base, None, 10, false).unwrap();
        client.health().await.unwrap();

        let id = client
            .publish(QueueKind::Requests, &json!({"jobId": "j1"}))
            .await
            .unwrap();
        let leased = client.consume(QueueKind::Requests, 5).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].queue_message_id, id);
        assert_eq!(leased[0].payload["jobId"], "j1");

        client.ack(QueueKind::Requests, &[id]).await.unwrap();
        assert!(client
            .consume(QueueKind::Requests, 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_bearer_token_is_enforced() {
        let (_dir, base) = spawn_server(Some("secret")).await;

        let anonymous = HttpQueue::new(&base, None, 10, false).unwrap();
        let err = anonymous
            .publish(QueueKind::Requests, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Status { status: 401, .. }));

        let authed = HttpQueue::new(&base, Some("secret".to_string()), 10, false).unwrap();
        authed
            .publish(QueueKind::Requests, &json!({"ok": true}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_queue_is_404() {
        let (_dir, base) = spawn_server(None).await;
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{base}/v1/queue/bogus"))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }
}
