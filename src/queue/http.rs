//! HTTP client for a remote queue server speaking the `/v1/queue` protocol.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AsyncTableQueue, QueueEnvelope, QueueError, QueueKind, Result};

#[derive(Debug, Clone)]
pub struct HttpQueue {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    queue_message_id: String,
}

#[derive(Debug, Deserialize)]
struct LeaseResponse {
    messages: Vec<LeasedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeasedMessage {
    queue_message_id: String,
    payload: Value,
}

impl HttpQueue {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout_secs: u64,
        insecure_tls: bool,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    fn queue_url(&self, kind: QueueKind, suffix: &str) -> String {
        format!(
            "{}/v1/queue/{}{}",
            self.base_url,
            kind.path_segment(),
            suffix
        )
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(QueueError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Probe the server's health endpoint.
    pub async fn health(&self) -> Result<()> {
        let response = self
            .authed(self.client.get(format!("{}/health", self.base_url)))
            .send()
            .await?;
        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Self::check(response).await.map(|_| ())
        }
    }
}

#[async_trait]
impl AsyncTableQueue for HttpQueue {
    async fn publish(&self, kind: QueueKind, payload: &Value) -> Result<String> {
        let response = self
            .authed(self.client.post(self.queue_url(kind, "")))
            .json(payload)
            .send()
            .await?;
        let response = Self::check(response).await?;
        let body: PublishResponse = response.json().await?;
        Ok(body.queue_message_id)
    }

    async fn consume(&self, kind: QueueKind, limit: usize) -> Result<Vec<QueueEnvelope>> {
        let response = self
            .authed(self.client.post(self.queue_url(kind, "/lease")))
            .json(&json!({ "limit": limit }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        let body: LeaseResponse = response.json().await?;
        Ok(body
            .messages
            .into_iter()
            .map(|m| QueueEnvelope {
                queue_message_id: m.queue_message_id,
                payload: m.payload,
            })
            .collect())
    }

    async fn ack(&self, kind: QueueKind, ids: &[String]) -> Result<()> {
        let response = self
            .authed(self.client.post(self.queue_url(kind, "/ack")))
            .json(&json!({ "ids": ids }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
