use serde::{Deserialize, Serialize};

/// Lifecycle status. The only exposed transition is Draft -> Active via
/// publish; disabling a live flow is the separate `enabled` switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowStatus {
    Draft,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: FlowStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub enabled: bool,
    pub created_by: Option<String>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    pub updated_at: i64,
}

impl Flow {
    pub fn new(name: String, description: String, created_by: Option<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: format!("flow_{}", uuid::Uuid::new_v4()),
            name,
            description,
            status: FlowStatus::Draft,
            tags: Vec::new(),
            enabled: true,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp();
    }
}
