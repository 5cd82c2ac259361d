use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A (flow, event type, conditions) binding. The stored `conditions` map is
/// free-form; its shape is produced by the typed [`TriggerSpec`] builders and
/// interpreted per event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub flow_id: String,
    pub event_type: String,
    #[serde(default)]
    pub conditions: Map<String, Value>,
    pub is_active: bool,
    pub created_at: i64,
}

impl Trigger {
    pub fn new(flow_id: String, event_type: String, conditions: Map<String, Value>) -> Self {
        Self {
            id: format!("trg_{}", uuid::Uuid::new_v4()),
            flow_id,
            event_type,
            conditions,
            is_active: true,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// One clause of the declarative condition grammar evaluated against the
/// triggering payload (second matching phase, after event-type narrowing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    In,
    Exists,
}

/// Closed vocabulary of trigger kinds accepted by the editor. Each variant
/// canonicalizes into the generic stored `conditions` map with its defaults
/// filled in, so new kinds are added as one variant here rather than a schema
/// change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    Cron {
        expression: String,
        timezone: Option<String>,
    },
    Interval {
        minutes: i64,
    },
    ScheduleAt {
        at: String,
    },
    Inactivity {
        days: i64,
        field: Option<String>,
    },
    Threshold {
        field: String,
        operator: ConditionOp,
        value: Value,
    },
    TargetedCondition {
        clauses: Vec<Condition>,
    },
}

impl TriggerSpec {
    /// Event type used when the editor does not name one explicitly.
    pub fn default_event_type(&self) -> &'static str {
        match self {
            TriggerSpec::Cron { .. } => "schedule.cron",
            TriggerSpec::Interval { .. } => "schedule.interval",
            TriggerSpec::ScheduleAt { .. } => "schedule.at",
            TriggerSpec::Inactivity { .. } => "entity.inactive",
            TriggerSpec::Threshold { .. } => "metric.threshold",
            TriggerSpec::TargetedCondition { .. } => "entity.matched",
        }
    }

    /// Canonical stored representation of this trigger kind.
    pub fn build_conditions(&self) -> Map<String, Value> {
        let value = match self {
            TriggerSpec::Cron {
                expression,
                timezone,
            } => json!({
                "expression": expression,
                "timezone": timezone.as_deref().unwrap_or("UTC"),
            }),
            TriggerSpec::Interval { minutes } => json!({
                "interval_minutes": (*minutes).max(1),
            }),
            TriggerSpec::ScheduleAt { at } => json!({
                "at": at,
            }),
            TriggerSpec::Inactivity { days, field } => json!({
                "inactive_days": days,
                "field": field.as_deref().unwrap_or("last_seen_at"),
            }),
            TriggerSpec::Threshold {
                field,
                operator,
                value,
            } => json!({
                "clauses": [{"field": field, "op": operator, "value": value}],
            }),
            TriggerSpec::TargetedCondition { clauses } => json!({
                "clauses": clauses,
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Parse the clause list out of a stored conditions map. Absent or malformed
/// clauses yield None; the caller decides whether that means "match all"
/// (no predicate declared) or "fail closed" (predicate present but broken).
pub fn parse_clauses(conditions: &Map<String, Value>) -> Option<Result<Vec<Condition>, ()>> {
    let raw = conditions.get("clauses")?;
    Some(serde_json::from_value::<Vec<Condition>>(raw.clone()).map_err(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_spec_fills_timezone_default() {
        let spec = TriggerSpec::Cron {
            expression: "0 0 * * * *".into(),
            timezone: None,
        };
        let conditions = spec.build_conditions();
        assert_eq!(conditions["expression"], "0 0 * * * *");
        assert_eq!(conditions["timezone"], "UTC");
        assert_eq!(spec.default_event_type(), "schedule.cron");
    }

    #[test]
    fn test_threshold_spec_becomes_clause_list() {
        let spec = TriggerSpec::Threshold {
            field: "total".into(),
            operator: ConditionOp::Gte,
            value: json!(100),
        };
        let conditions = spec.build_conditions();
        let clauses = parse_clauses(&conditions).unwrap().unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].field, "total");
        assert_eq!(clauses[0].op, ConditionOp::Gte);
    }

    #[test]
    fn test_spec_round_trips_through_tag() {
        let spec: TriggerSpec =
            serde_json::from_value(json!({"type": "interval", "minutes": 15})).unwrap();
        assert_eq!(spec, TriggerSpec::Interval { minutes: 15 });
    }

    #[test]
    fn test_parse_clauses_fails_closed_on_malformed_input() {
        let mut conditions = Map::new();
        conditions.insert("clauses".into(), json!("not-a-list"));
        assert!(parse_clauses(&conditions).unwrap().is_err());
        assert!(parse_clauses(&Map::new()).is_none());
    }
}
