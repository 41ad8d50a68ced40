//! Seam to the external fetch collaborator.
//!
//! Session handling, authentication and page scraping are entirely the
//! collaborator's concern; the core only consumes a raw status reading or a
//! typed failure and reacts by retrying on the next cycle.

use crate::error::FetchError;
use crate::status::StatusReading;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch(&self, resource_id: i64) -> Result<StatusReading, FetchError>;
}

/// HTTP adapter to the fetch service: `GET {base}/status/{id}` returning a
/// JSON [`StatusReading`].
pub struct HttpStatusFetcher {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpStatusFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl StatusFetcher for HttpStatusFetcher {
    async fn fetch(&self, resource_id: i64) -> Result<StatusReading, FetchError> {
        let url = format!("{}/status/{resource_id}", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        match response.status() {
            status if status.is_success() => response
                .json::<StatusReading>()
                .await
                .map_err(|e| FetchError::InvalidReading(e.to_string())),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(FetchError::AuthExpired)
            }
            reqwest::StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            status => Err(FetchError::Network(format!(
                "unexpected status {status} from fetch service"
            ))),
        }
    }
}
