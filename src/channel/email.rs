use crate::channel::ChannelSender;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use lettre::message::{Mailbox, Message};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde_json::{Map, Value};
use tracing::info;

/// SMTP email sender. Without a configured host it degrades to logging the
/// composed message, which keeps local development and tests provider-free.
pub struct EmailSender {
    smtp_host: Option<String>,
    from: String,
}

impl EmailSender {
    pub fn new(smtp_host: Option<String>, from: Option<String>) -> Self {
        Self {
            smtp_host,
            from: from.unwrap_or_else(|| "noreply@flowline.local".to_string()),
        }
    }

    fn recipients(content: &Map<String, Value>) -> Result<Vec<Mailbox>> {
        let raw = content
            .get("to")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow!("email content has no 'to' list"))?;
        raw.iter()
            .filter_map(|v| v.as_str())
            .map(|s| {
                s.trim()
                    .parse::<Mailbox>()
                    .map_err(|e| anyhow!("invalid email address '{}': {}", s, e))
            })
            .collect()
    }

    fn compose(&self, content: &Map<String, Value>) -> Result<Message> {
        let recipients = Self::recipients(content)?;
        if recipients.is_empty() {
            return Err(anyhow!("email content has an empty 'to' list"));
        }
        let subject = content
            .get("subject")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let body = content
            .get("body")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| anyhow!("invalid from address '{}': {}", self.from, e))?;
        let mut builder = Message::builder().from(from).subject(subject);
        for recipient in recipients {
            builder = builder.to(recipient);
        }
        Ok(builder.body(body.to_string())?)
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, content: &Map<String, Value>) -> Result<()> {
        let message = self.compose(content)?;

        match &self.smtp_host {
            Some(host) => {
                let transport: AsyncSmtpTransport<Tokio1Executor> =
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).build();
                transport
                    .send(message)
                    .await
                    .map_err(|e| anyhow!("smtp send failed: {}", e))?;
                Ok(())
            }
            None => {
                info!(
                    to = ?content.get("to"),
                    subject = ?content.get("subject"),
                    "no smtp host configured, email logged instead of sent"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(to: Value) -> Map<String, Value> {
        let Value::Object(map) = json!({"to": to, "subject": "s", "body": "b"}) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn test_compose_valid_message() {
        let sender = EmailSender::new(None, None);
        assert!(sender.compose(&content(json!(["ops@example.com"]))).is_ok());
    }

    #[test]
    fn test_compose_rejects_bad_recipients() {
        let sender = EmailSender::new(None, None);
        assert!(sender.compose(&content(json!(["not-an-address"]))).is_err());
        assert!(sender.compose(&content(json!([]))).is_err());
    }

    #[tokio::test]
    async fn test_send_without_host_succeeds() {
        let sender = EmailSender::new(None, None);
        sender
            .send(&content(json!(["ops@example.com"])))
            .await
            .unwrap();
    }
}
