use crate::models::{Action, Condition, ConditionOp, Flow, FlowStatus, Trigger};
use crate::models::trigger::parse_clauses;
use crate::storage::Storage;
use crate::template;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One result tuple per matching trigger: the owning flow and the subset of
/// its actions bound to this trigger (or to the whole flow).
#[derive(Debug, Clone)]
pub struct FlowMatch {
    pub flow: Flow,
    pub trigger: Trigger,
    pub actions: Vec<Action>,
}

/// Two-phase matching: a cheap event-type narrowing query here, then the
/// in-memory condition predicate ([`conditions_met`]) applied by the caller
/// before a flow actually runs.
pub struct TriggerMatcher {
    storage: Arc<Storage>,
}

impl TriggerMatcher {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn find_flows_for_event(&self, event_type: &str) -> Result<Vec<FlowMatch>> {
        let triggers = self.storage.flows.list_active_triggers_by_event(event_type)?;
        if triggers.is_empty() {
            return Ok(Vec::new());
        }

        // Batch-load the owning flows once per distinct flow id
        let mut flows: HashMap<String, Flow> = HashMap::new();
        let mut flow_actions: HashMap<String, Vec<Action>> = HashMap::new();
        for trigger in &triggers {
            if flows.contains_key(&trigger.flow_id) {
                continue;
            }
            let Some(flow) = self.storage.flows.get_flow(&trigger.flow_id)? else {
                warn!(flow_id = %trigger.flow_id, trigger_id = %trigger.id, "trigger points at missing flow");
                continue;
            };
            if flow.status != FlowStatus::Active || !flow.enabled {
                continue;
            }
            let mut actions = self.storage.flows.list_actions_for_flow(&flow.id)?;
            sort_actions(&mut actions);
            flow_actions.insert(flow.id.clone(), actions);
            flows.insert(flow.id.clone(), flow);
        }

        let mut matches = Vec::new();
        for trigger in triggers {
            let Some(flow) = flows.get(&trigger.flow_id) else {
                continue;
            };
            let actions = flow_actions
                .get(&trigger.flow_id)
                .map(|all| {
                    all.iter()
                        .filter(|a| {
                            a.trigger_id.is_none() || a.trigger_id.as_deref() == Some(&trigger.id)
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            matches.push(FlowMatch {
                flow: flow.clone(),
                trigger,
                actions,
            });
        }

        debug!(event_type, matched = matches.len(), "trigger narrowing complete");
        Ok(matches)
    }
}

/// Actions execute ascending by order index; ties go to the most recently
/// updated row first.
pub fn sort_actions(actions: &mut [Action]) {
    actions.sort_by(|a, b| {
        a.order_index
            .cmp(&b.order_index)
            .then(b.updated_at.cmp(&a.updated_at))
    });
}

/// Second matching phase: evaluate the trigger's declared clause list against
/// the event payload. No clauses means the trigger matches every event of its
/// type; a malformed clause list or an evaluation error fails closed.
pub fn conditions_met(trigger: &Trigger, payload: &Value) -> bool {
    match parse_clauses(&trigger.conditions) {
        None => true,
        Some(Err(())) => {
            warn!(trigger_id = %trigger.id, "malformed condition clauses, treating as no match");
            false
        }
        Some(Ok(clauses)) => clauses_met(&clauses, payload),
    }
}

/// Evaluate a clause list against a JSON root, AND-combined. Also used by the
/// dispatcher's conditional action kind (there the root is the whole
/// execution context, so fields like `vars.tier` resolve too).
pub fn clauses_met(clauses: &[Condition], root: &Value) -> bool {
    clauses.iter().all(|c| clause_met(c, root))
}

fn clause_met(clause: &Condition, payload: &Value) -> bool {
    let field = template::lookup(payload, &clause.field);
    match clause.op {
        ConditionOp::Exists => field.is_some(),
        ConditionOp::Eq => field.is_some_and(|v| v == &clause.value),
        ConditionOp::Ne => field.is_some_and(|v| v != &clause.value),
        ConditionOp::Gt => compare_numeric(field, &clause.value).is_some_and(|o| o.is_gt()),
        ConditionOp::Gte => compare_numeric(field, &clause.value).is_some_and(|o| o.is_ge()),
        ConditionOp::Lt => compare_numeric(field, &clause.value).is_some_and(|o| o.is_lt()),
        ConditionOp::Lte => compare_numeric(field, &clause.value).is_some_and(|o| o.is_le()),
        ConditionOp::Contains => match field {
            Some(Value::String(s)) => clause.value.as_str().is_some_and(|needle| s.contains(needle)),
            Some(Value::Array(items)) => items.contains(&clause.value),
            _ => false,
        },
        ConditionOp::In => match &clause.value {
            Value::Array(allowed) => field.is_some_and(|v| allowed.contains(v)),
            _ => false,
        },
    }
}

fn compare_numeric(field: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let left = field?.as_f64()?;
    let right = expected.as_f64()?;
    left.partial_cmp(&right)
}
