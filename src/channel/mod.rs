pub mod email;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub use email::EmailSender;

/// Channel-sender capability consumed per action channel. Implementations
/// own their transport details (and any per-provider retry); the dispatcher
/// only imposes its bounded timeout around `send`.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, content: &Map<String, Value>) -> Result<()>;
}

/// Maps action types to their channel sender. Unknown types are simply not
/// present; the dispatcher logs and skips those.
pub struct ChannelRegistry {
    senders: HashMap<String, Arc<dyn ChannelSender>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    /// Registry with the built-in channels wired up.
    pub fn with_defaults(smtp_host: Option<String>, smtp_from: Option<String>) -> Self {
        let mut registry = Self::new();
        registry.register("email", Arc::new(EmailSender::new(smtp_host, smtp_from)));
        registry.register("sms", Arc::new(LogSender::new("sms")));
        registry.register("push", Arc::new(LogSender::new("push")));
        registry
    }

    pub fn register(&mut self, action_type: &str, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(action_type.to_string(), sender);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(action_type).cloned()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Stand-in sender for channels whose provider integration lives outside
/// this engine: it records the handoff and succeeds.
pub struct LogSender {
    channel: &'static str,
}

impl LogSender {
    pub fn new(channel: &'static str) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelSender for LogSender {
    async fn send(&self, content: &Map<String, Value>) -> Result<()> {
        let to = content
            .get("to")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<unspecified>".to_string());
        info!(channel = self.channel, to = %to, "message handed to channel provider");
        Ok(())
    }
}
