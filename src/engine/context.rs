use crate::template;
use serde_json::{Map, Value, json};
use tracing::warn;

/// Transient data bag a flow execution renders its action content against:
/// the triggering payload, the entity the event concerns, and mutable vars
/// that conditional actions may patch mid-flow.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    root: Value,
}

impl ExecutionContext {
    pub fn new(payload: Value, entity: Value) -> Self {
        Self {
            root: json!({
                "payload": payload,
                "entity": entity,
                "vars": {},
            }),
        }
    }

    pub fn payload(&self) -> &Value {
        &self.root["payload"]
    }

    /// Full context tree, for predicate evaluation against any section.
    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn lookup(&self, path: &str) -> Option<&Value> {
        template::lookup(&self.root, path)
    }

    pub fn set_var(&mut self, key: &str, value: Value) {
        if let Some(vars) = self.root.get_mut("vars").and_then(Value::as_object_mut) {
            vars.insert(key.to_string(), value);
        }
    }

    /// Walk a content tree and substitute placeholders in every string leaf.
    /// Rendering is best-effort: a field whose template cannot be resolved is
    /// kept verbatim (logged, never fatal).
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => match template::render(s, &self.root) {
                Ok(rendered) => Value::String(rendered),
                Err(e) => {
                    warn!(placeholder = %e.placeholder, "template render failed, keeping raw content");
                    value.clone()
                }
            },
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }

    pub fn interpolate_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
            .collect()
    }
}
