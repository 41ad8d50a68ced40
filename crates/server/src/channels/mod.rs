//! Notification delivery channels.
//!
//! Each channel is an external collaborator adapter. Deliveries must be safe
//! to repeat for the same logical notification: the at-most-once guarantee
//! lives in the store, not here.

pub mod chatbot;
pub mod email;
pub mod push;

pub use chatbot::ChatBotChannel;
pub use email::EmailChannel;
pub use push::PushChannel;

use crate::directory::SubscriberContact;
use crate::entity::resource;
use crate::error::ChannelError;
use crate::status::ResourceStatus;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Everything a channel needs to render one opening notice.
#[derive(Clone, Debug)]
pub struct NotificationPayload {
    pub resource_id: i64,
    pub resource_name: Option<String>,
    pub status: ResourceStatus,
    pub url: String,
    pub opened_at: OffsetDateTime,
}

impl NotificationPayload {
    pub fn for_resource(model: &resource::Model, source_url_base: &str) -> Self {
        Self {
            resource_id: model.id,
            resource_name: model.name.clone(),
            status: ResourceStatus::from_db(&model.status),
            url: format!("{}/{}", source_url_base.trim_end_matches('/'), model.id),
            opened_at: model
                .opened_at
                .unwrap_or_else(OffsetDateTime::now_utc),
        }
    }

    /// Human label for the kind of opening, used by all channel renderers.
    pub fn action_label(&self) -> &'static str {
        match self.status {
            ResourceStatus::OpenRestricted => "application",
            _ => "entry",
        }
    }

    /// Plain-text notice shared by the push and chat-bot channels.
    pub fn text_message(&self) -> String {
        let name = self
            .resource_name
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default();
        format!(
            "Event {}{} is now open for {}: {}",
            self.resource_id,
            name,
            self.action_label(),
            self.url
        )
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this subscriber can receive through this channel.
    fn enabled_for(&self, contact: &SubscriberContact) -> bool;

    async fn deliver(
        &self,
        contact: &SubscriberContact,
        payload: &NotificationPayload,
    ) -> Result<(), ChannelError>;
}
