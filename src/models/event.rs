use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An incoming or synthesized event fed to the trigger matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    /// Unix timestamp (seconds)
    pub occurred_at: i64,
}

impl Event {
    pub fn new(event_type: String, payload: Value) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            event_type,
            payload,
            occurred_at: chrono::Utc::now().timestamp(),
        }
    }
}
