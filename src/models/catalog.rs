use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catalog entry describing a known event type. Used for validation and
/// introspection only, never for execution-path branching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTypeDef {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Declared payload shape, free-form JSON schema fragment
    #[serde(default)]
    pub schema: Value,
    pub is_active: bool,
}

/// Catalog entry describing a known action type and the channels it may use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTypeDef {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schema: Value,
    pub is_active: bool,
    #[serde(default)]
    pub supported_channels: Vec<String>,
}

impl ActionTypeDef {
    pub fn supports_channel(&self, channel: &str) -> bool {
        self.supported_channels.iter().any(|c| c == channel)
    }
}
