use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{header::CONTENT_TYPE, Client};
use std::time::Duration;
use tracing::debug;

use crate::config::DocumentConfig;
use crate::utils::error::DocumentError;

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Retrieves raw document bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, DocumentError>;
}

/// GET over reqwest with a whole-request timeout and a body size cap.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, DocumentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DocumentError::Fetch(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, max_bytes })
    }

    pub fn from_config(config: &DocumentConfig) -> Result<Self, DocumentError> {
        Self::new(
            Duration::from_secs(config.fetch_timeout_seconds),
            config.max_fetch_bytes,
        )
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, DocumentError> {
        debug!("Fetching document {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DocumentError::Fetch(format!("Failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DocumentError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(declared) = response.content_length() {
            if declared as usize > self.max_bytes {
                return Err(DocumentError::TooLarge {
                    size: declared as usize,
                    limit: self.max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // servers may omit or misstate Content-Length, so count as we read
        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DocumentError::Fetch(format!("Failed reading {}: {}", url, e)))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(DocumentError::TooLarge {
                    size: body.len() + chunk.len(),
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes from {} ({:?})", body.len(), url, content_type);
        Ok(FetchedDocument {
            bytes: body.freeze(),
            content_type,
        })
    }
}
