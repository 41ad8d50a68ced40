//! Push delivery through an external-user-id keyed provider API.

use crate::channels::{NotificationChannel, NotificationPayload};
use crate::directory::SubscriberContact;
use crate::error::ChannelError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct PushRequest<'a> {
    include_external_user_ids: [&'a str; 1],
    headings: PushText<&'static str>,
    contents: PushText,
    url: &'a str,
    data: PushData,
}

#[derive(Serialize)]
struct PushText<T = String> {
    en: T,
}

#[derive(Serialize)]
struct PushData {
    resource_id: i64,
    status: String,
}

pub struct PushChannel {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl PushChannel {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            endpoint,
            api_key,
            client: reqwest::Client::builder()
                .timeout(DELIVERY_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl NotificationChannel for PushChannel {
    fn name(&self) -> &'static str {
        "push"
    }

    fn enabled_for(&self, contact: &SubscriberContact) -> bool {
        contact.push_enabled
    }

    async fn deliver(
        &self,
        contact: &SubscriberContact,
        payload: &NotificationPayload,
    ) -> Result<(), ChannelError> {
        let request = PushRequest {
            include_external_user_ids: [contact.subscriber_id.as_str()],
            headings: PushText {
                en: "Entries are open!",
            },
            contents: PushText {
                en: payload.text_message(),
            },
            url: &payload.url,
            data: PushData {
                resource_id: payload.resource_id,
                status: payload.status.to_string(),
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Basic {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChannelError::Timeout(DELIVERY_TIMEOUT)
                } else {
                    ChannelError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let context = response.text().await.unwrap_or_default();
            Err(ChannelError::Http {
                status: status.as_u16(),
                context,
            })
        }
    }
}
