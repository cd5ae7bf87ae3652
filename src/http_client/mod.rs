//! HTTP client with conditional request and streaming download support.

mod response;

pub use response::{FetchResponse, HeadResponse};

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Integrity facts about a file written by [`HttpClient::download_to_file`].
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub sha256: String,
    pub bytes: i64,
}

/// Thin wrapper over [`reqwest::Client`] that knows how to issue
/// conditional requests from stored validators.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration, insecure_tls: bool) -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self { client })
    }

    /// GET with optional conditional headers. Pass the stored validators to
    /// let the origin answer 304 instead of resending the body.
    pub async fn get(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResponse, HttpError> {
        let mut request = self.client.get(url);
        if let Some(etag) = etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(lm) = last_modified {
            request = request.header("If-Modified-Since", lm);
        }
        let response = request.send().await?;
        Ok(FetchResponse {
            status: response.status(),
            headers: header_map(&response),
            response,
        })
    }

    /// Fetch a page body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let response = self.get(url, None, None).await?;
        Ok(response.text().await?)
    }

    /// HEAD with optional conditional headers.
    pub async fn head(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<HeadResponse, HttpError> {
        let mut request = self.client.head(url);
        if let Some(etag) = etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(lm) = last_modified {
            request = request.header("If-Modified-Since", lm);
        }
        let response = request.send().await?;
        Ok(HeadResponse {
            status: response.status(),
            headers: header_map(&response),
        })
    }

    /// Stream a response body to `dest`, hashing as bytes arrive.
    ///
    /// The body is written to `<dest>.part` and renamed into place only
    /// after the stream completes, so `dest` never holds a truncated file.
    pub async fn download_to_file(
        &self,
        response: FetchResponse,
        dest: &Path,
    ) -> Result<DownloadedFile, HttpError> {
        let part_path = dest.with_extension(partial_extension(dest));
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let result = async {
            let mut file = tokio::fs::File::create(&part_path).await?;
            let mut hasher = Sha256::new();
            let mut bytes: i64 = 0;
            let mut stream = response.response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                hasher.update(&chunk);
                bytes += chunk.len() as i64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<_, HttpError>(DownloadedFile {
                sha256: hex::encode(hasher.finalize()),
                bytes,
            })
        }
        .await;

        match result {
            Ok(downloaded) => {
                tokio::fs::rename(&part_path, dest).await?;
                Ok(downloaded)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                Err(err)
            }
        }
    }
}

fn header_map(response: &reqwest::Response) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.to_string(), v.to_string());
        }
    }
    headers
}

fn partial_extension(dest: &Path) -> String {
    match dest.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.part"),
        None => "part".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_extension_preserves_original() {
        assert_eq!(
            partial_extension(Path::new("/raw/abc.pdf")),
            "pdf.part".to_string()
        );
        assert_eq!(partial_extension(Path::new("/raw/abc")), "part".to_string());
    }
}
