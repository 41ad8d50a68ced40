//! Seam to the subscriber directory collaborator.
//!
//! The core never stores end-user identities. Tier, contact addresses and
//! enabled channels for a subscriber come from the directory, fronted by a
//! short TTL cache since tiers change rarely.

use crate::cache::TtlCache;
use crate::error::DirectoryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the directory knows about one subscriber.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriberContact {
    pub subscriber_id: String,
    pub tier: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub push_enabled: bool,
    /// Chat-bot conversation id, when the subscriber linked the bot.
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn contact(&self, subscriber_id: &str) -> Result<SubscriberContact, DirectoryError>;
}

/// HTTP adapter to the directory service:
/// `GET {base}/profiles/{subscriber_id}` returning a JSON [`SubscriberContact`].
pub struct HttpDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SubscriberDirectory for HttpDirectory {
    async fn contact(&self, subscriber_id: &str) -> Result<SubscriberContact, DirectoryError> {
        let url = format!("{}/profiles/{subscriber_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<SubscriberContact>()
                .await
                .map_err(|e| DirectoryError::Unavailable(e.to_string())),
            reqwest::StatusCode::NOT_FOUND => {
                Err(DirectoryError::UnknownSubscriber(subscriber_id.to_string()))
            }
            status => Err(DirectoryError::Unavailable(format!(
                "unexpected status {status} from directory"
            ))),
        }
    }
}

/// TTL-caching wrapper around any directory implementation.
pub struct CachedDirectory<D> {
    inner: D,
    cache: TtlCache<String, SubscriberContact>,
}

impl<D: SubscriberDirectory> CachedDirectory<D> {
    pub fn new(inner: D, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }
}

#[async_trait]
impl<D: SubscriberDirectory> SubscriberDirectory for CachedDirectory<D> {
    async fn contact(&self, subscriber_id: &str) -> Result<SubscriberContact, DirectoryError> {
        let key = subscriber_id.to_string();
        if let Some(contact) = self.cache.get(&key) {
            return Ok(contact);
        }
        let contact = self.inner.contact(subscriber_id).await?;
        self.cache.insert(key, contact.clone());
        Ok(contact)
    }
}
