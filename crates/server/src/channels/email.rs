//! Email delivery of opening notices over SMTP.

use crate::channels::{NotificationChannel, NotificationPayload};
use crate::directory::SubscriberContact;
use crate::error::ChannelError;
use async_trait::async_trait;
use lettre::message::{MultiPart, SinglePart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;

pub struct EmailChannel {
    mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
}

impl EmailChannel {
    pub fn new(mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>, from: String) -> Self {
        Self { mailer, from }
    }

    fn render_text(payload: &NotificationPayload) -> String {
        let name_line = payload
            .resource_name
            .as_deref()
            .map(|n| format!("Event: {n}\n"))
            .unwrap_or_default();
        format!(
            "Hello,\n\n\
             Event {} just opened for {}.\n\
             {}\n\
             Enter now: {}\n\n\
             The EntryWatch Team",
            payload.resource_id,
            payload.action_label(),
            name_line,
            payload.url
        )
    }

    fn render_html(payload: &NotificationPayload) -> String {
        let name_line = payload
            .resource_name
            .as_deref()
            .map(|n| format!("<p><b>{n}</b></p>"))
            .unwrap_or_default();
        format!(
            "<html><body>\
             <h2>Event {} is open for {}</h2>\
             {}\
             <p><a href=\"{}\">Go to the event page</a></p>\
             <p><i>EntryWatch notification</i></p>\
             </body></html>",
            payload.resource_id,
            payload.action_label(),
            name_line,
            payload.url
        )
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn enabled_for(&self, contact: &SubscriberContact) -> bool {
        contact.email.is_some()
    }

    async fn deliver(
        &self,
        contact: &SubscriberContact,
        payload: &NotificationPayload,
    ) -> Result<(), ChannelError> {
        let to = contact
            .email
            .as_deref()
            .ok_or_else(|| ChannelError::Rejected("subscriber has no email address".into()))?;

        let subject = match payload.resource_name.as_deref() {
            Some(name) => format!("Entries open: {name}"),
            None => format!("Entries open: event {}", payload.resource_id),
        };

        let message = lettre::Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| ChannelError::Rejected(format!("invalid from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| ChannelError::Rejected(format!("invalid recipient: {e}")))?)
            .subject(subject)
            .header(lettre::message::header::MIME_VERSION_1_0)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(lettre::message::header::ContentType::TEXT_PLAIN)
                            .body(Self::render_text(payload)),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(lettre::message::header::ContentType::TEXT_HTML)
                            .body(Self::render_html(payload)),
                    ),
            )
            .map_err(|e| ChannelError::Rejected(e.to_string()))?;

        self.mailer
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }
}
