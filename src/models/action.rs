use crate::models::trigger::Condition;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Reserved content key where `mark_failed` records the failure reason.
pub const FAILURE_REASON_KEY: &str = "failure_reason";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Sent,
    Failed,
}

/// One ordered, typed side-effecting step belonging to a flow.
///
/// `trigger_id == None` means the action applies to every trigger of its flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub flow_id: String,
    pub trigger_id: Option<String>,
    pub action_type: String,
    pub channel: Option<String>,
    #[serde(default)]
    pub content: Map<String, Value>,
    pub order_index: i32,
    pub delay_minutes: i64,
    pub status: ActionStatus,
    pub scheduled_for: Option<i64>,
    pub executed_at: Option<i64>,
    pub retry_count: u32,
    pub last_retry_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Action {
    pub fn new(flow_id: String, trigger_id: Option<String>, spec: &ActionSpec, order_index: i32) -> Self {
        let now = chrono::Utc::now().timestamp();
        let delay_minutes = spec.delay_minutes().max(0);
        Self {
            id: format!("act_{}", uuid::Uuid::new_v4()),
            flow_id,
            trigger_id,
            action_type: spec.action_type(),
            channel: spec.channel(),
            content: spec.build_content(),
            order_index,
            delay_minutes,
            status: ActionStatus::Pending,
            scheduled_for: if delay_minutes > 0 {
                Some(now + delay_minutes * 60)
            } else {
                None
            },
            executed_at: None,
            retry_count: 0,
            last_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_sent(&mut self, timestamp: i64) {
        self.status = ActionStatus::Sent;
        self.executed_at = Some(timestamp);
        self.updated_at = chrono::Utc::now().timestamp();
    }

    /// Record a failure additively: the reason lands under a reserved content
    /// key and the rest of the content is preserved.
    pub fn mark_failed(&mut self, reason: &str) {
        let now = chrono::Utc::now().timestamp();
        self.status = ActionStatus::Failed;
        self.content
            .insert(FAILURE_REASON_KEY.to_string(), Value::String(reason.to_string()));
        self.retry_count += 1;
        self.last_retry_at = Some(now);
        self.updated_at = now;
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.status == ActionStatus::Pending && self.scheduled_for.is_some_and(|at| at <= now)
    }
}

/// Closed vocabulary of action kinds accepted by the editor, canonicalized
/// into the generic stored `content` map. The `Generic` variant is the
/// fallback for catalog-declared kinds with no dedicated builder yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    Email {
        to: Vec<String>,
        subject: String,
        body: String,
        #[serde(default)]
        delay_minutes: i64,
    },
    Sms {
        to: Vec<String>,
        message: String,
        #[serde(default)]
        delay_minutes: i64,
    },
    Push {
        to: Vec<String>,
        title: String,
        body: String,
        #[serde(default)]
        delay_minutes: i64,
    },
    Delay {
        minutes: i64,
    },
    Conditional {
        clauses: Vec<Condition>,
        set: Map<String, Value>,
    },
    Generic {
        action_type: String,
        channel: Option<String>,
        #[serde(default)]
        content: Map<String, Value>,
        #[serde(default)]
        delay_minutes: i64,
    },
}

impl ActionSpec {
    pub fn action_type(&self) -> String {
        match self {
            ActionSpec::Email { .. } => "email".to_string(),
            ActionSpec::Sms { .. } => "sms".to_string(),
            ActionSpec::Push { .. } => "push".to_string(),
            ActionSpec::Delay { .. } => "delay".to_string(),
            ActionSpec::Conditional { .. } => "conditional".to_string(),
            ActionSpec::Generic { action_type, .. } => action_type.clone(),
        }
    }

    pub fn channel(&self) -> Option<String> {
        match self {
            ActionSpec::Email { .. } => Some("email".to_string()),
            ActionSpec::Sms { .. } => Some("sms".to_string()),
            ActionSpec::Push { .. } => Some("push".to_string()),
            ActionSpec::Generic { channel, .. } => channel.clone(),
            _ => None,
        }
    }

    /// The `delay` kind has no send of its own: the builder lifts its minutes
    /// onto the action row and the scheduled_for mechanism does the rest.
    pub fn delay_minutes(&self) -> i64 {
        match self {
            ActionSpec::Email { delay_minutes, .. }
            | ActionSpec::Sms { delay_minutes, .. }
            | ActionSpec::Push { delay_minutes, .. }
            | ActionSpec::Generic { delay_minutes, .. } => *delay_minutes,
            ActionSpec::Delay { minutes } => *minutes,
            ActionSpec::Conditional { .. } => 0,
        }
    }

    pub fn build_content(&self) -> Map<String, Value> {
        let value = match self {
            ActionSpec::Email {
                to, subject, body, ..
            } => json!({"to": to, "subject": subject, "body": body}),
            ActionSpec::Sms { to, message, .. } => json!({"to": to, "message": message}),
            ActionSpec::Push {
                to, title, body, ..
            } => json!({"to": to, "title": title, "body": body}),
            ActionSpec::Delay { minutes } => json!({"minutes": minutes}),
            ActionSpec::Conditional { clauses, set } => json!({"clauses": clauses, "set": set}),
            ActionSpec::Generic { content, .. } => Value::Object(content.clone()),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}
