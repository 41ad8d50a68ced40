//! Chat-bot delivery via a Telegram-compatible bot API.

use crate::channels::{NotificationChannel, NotificationPayload};
use crate::directory::SubscriberContact;
use crate::error::ChannelError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct ChatBotChannel {
    api_url: String,
    bot_token: String,
    client: reqwest::Client,
}

impl ChatBotChannel {
    pub fn new(api_url: String, bot_token: String) -> Self {
        Self {
            api_url,
            bot_token,
            client: reqwest::Client::builder()
                .timeout(DELIVERY_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_url.trim_end_matches('/'),
            self.bot_token,
            method
        )
    }
}

#[async_trait]
impl NotificationChannel for ChatBotChannel {
    fn name(&self) -> &'static str {
        "chat_bot"
    }

    fn enabled_for(&self, contact: &SubscriberContact) -> bool {
        contact.chat_id.is_some()
    }

    async fn deliver(
        &self,
        contact: &SubscriberContact,
        payload: &NotificationPayload,
    ) -> Result<(), ChannelError> {
        let chat_id = contact
            .chat_id
            .as_deref()
            .ok_or_else(|| ChannelError::Rejected("subscriber has no linked chat".into()))?;

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": payload.text_message(),
                "disable_web_page_preview": false,
            }))
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
        if !status.is_success() {
            let context = response.text().await.unwrap_or_default();
            return Err(ChannelError::Http {
                status: status.as_u16(),
                context,
            });
        }

        let body: BotApiResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        if body.ok {
            Ok(())
        } else {
            Err(ChannelError::Rejected(
                body.description.unwrap_or_else(|| "bot API refused".into()),
            ))
        }
    }
}
