use crate::AppCore;
use crate::engine::sort_actions;
use crate::error::EngineError;
use crate::models::{Action, ActionSpec, Flow, FlowStatus, Trigger, TriggerSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CreateFlowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    /// Inline shorthand: a typed trigger spec, optionally overriding the
    /// kind's default event type.
    #[serde(default)]
    pub trigger: Option<InlineTrigger>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Deserialize)]
pub struct InlineTrigger {
    #[serde(flatten)]
    pub spec: TriggerSpec,
    #[serde(default)]
    pub event_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FlowDetail {
    pub flow: Flow,
    pub triggers: Vec<Trigger>,
    pub actions: Vec<Action>,
}

/// Create a flow with its inline trigger and actions in one transaction.
/// Any invalid child aborts the whole write.
pub async fn create_flow(core: &AppCore, req: CreateFlowRequest) -> Result<Flow, EngineError> {
    if req.name.trim().is_empty() {
        return Err(EngineError::Validation("flow name is required".into()));
    }

    let mut flow = Flow::new(req.name, req.description, req.created_by);
    flow.tags = req.tags;

    let mut triggers = Vec::new();
    if let Some(inline) = req.trigger {
        let event_type = inline
            .event_type
            .unwrap_or_else(|| inline.spec.default_event_type().to_string());
        triggers.push(Trigger::new(
            flow.id.clone(),
            event_type,
            inline.spec.build_conditions(),
        ));
    }

    let mut actions = Vec::new();
    for (index, spec) in req.actions.iter().enumerate() {
        let action = Action::new(flow.id.clone(), None, spec, index as i32);
        check_channel_supported(core, &action)?;
        actions.push(action);
    }

    core.storage
        .flows
        .create_flow_bundle(&flow, &triggers, &actions)
        .map_err(|e| EngineError::CreateFailed(e.to_string()))?;

    info!(flow_id = %flow.id, triggers = triggers.len(), actions = actions.len(), "flow created");
    Ok(flow)
}

/// If a catalog definition exists for the action type, the declared channel
/// must be among its supported channels. Undeclared types pass.
fn check_channel_supported(core: &AppCore, action: &Action) -> Result<(), EngineError> {
    let Some(channel) = &action.channel else {
        return Ok(());
    };
    if let Some(def) = core.storage.catalog.get_action_type(&action.action_type)? {
        if !def.supports_channel(channel) {
            return Err(EngineError::Validation(format!(
                "channel '{}' is not supported for action type '{}'",
                channel, action.action_type
            )));
        }
    }
    Ok(())
}

pub async fn get_flow_detail(core: &AppCore, flow_id: &str) -> Result<FlowDetail, EngineError> {
    let flow = core
        .storage
        .flows
        .get_flow(flow_id)?
        .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
    let triggers = core.storage.flows.list_triggers_for_flow(flow_id)?;
    let mut actions = core.storage.flows.list_actions_for_flow(flow_id)?;
    sort_actions(&mut actions);
    Ok(FlowDetail {
        flow,
        triggers,
        actions,
    })
}

pub async fn list_flows(core: &AppCore) -> Result<Vec<Flow>, EngineError> {
    Ok(core.storage.flows.list_flows()?)
}

#[derive(Debug, Default, Deserialize)]
pub struct EditorSaveRequest {
    /// The editor sends false when nothing changed; the save becomes a no-op.
    #[serde(default)]
    pub is_new_record: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub delete_trigger_ids: Vec<String>,
    #[serde(default)]
    pub delete_action_ids: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<EditorTrigger>,
    #[serde(default)]
    pub actions: Vec<EditorAction>,
}

/// Trigger row as the editor sends it. An `id` with no stored counterpart is
/// a client-side placeholder and gets remapped to a fresh server id.
#[derive(Debug, Deserialize)]
pub struct EditorTrigger {
    pub id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub conditions: Map<String, Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct EditorAction {
    pub id: Option<String>,
    pub trigger_id: Option<String>,
    #[serde(flatten)]
    pub spec: ActionSpec,
    #[serde(default)]
    pub order_index: i32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct EditorSaveResult {
    pub updated: bool,
    pub flow_id: String,
    /// Client placeholder id -> persisted id, for rows created by this save
    pub remapped: HashMap<String, String>,
}

/// Apply one editor save as a single write: flow-meta patch, child deletes,
/// trigger upserts, then action upserts with placeholder trigger ids remapped
/// to the fresh server ids.
pub async fn save_editor(
    core: &AppCore,
    flow_id: &str,
    req: EditorSaveRequest,
) -> Result<EditorSaveResult, EngineError> {
    if !req.is_new_record {
        return Ok(EditorSaveResult {
            updated: false,
            flow_id: flow_id.to_string(),
            remapped: HashMap::new(),
        });
    }

    let mut flow = core
        .storage
        .flows
        .get_flow(flow_id)?
        .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;

    if let Some(name) = req.name {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("flow name cannot be blank".into()));
        }
        flow.name = name;
    }
    if let Some(description) = req.description {
        flow.description = description;
    }
    if let Some(tags) = req.tags {
        flow.tags = tags;
    }
    flow.touch();

    let mut remapped: HashMap<String, String> = HashMap::new();

    let mut upsert_triggers = Vec::new();
    for editor_trigger in req.triggers {
        let existing = match &editor_trigger.id {
            Some(id) => core.storage.flows.get_trigger(id)?,
            None => None,
        };
        let trigger = match existing {
            Some(mut trigger) => {
                trigger.event_type = editor_trigger.event_type;
                trigger.conditions = editor_trigger.conditions;
                trigger.is_active = editor_trigger.is_active;
                trigger
            }
            None => {
                let mut trigger = Trigger::new(
                    flow.id.clone(),
                    editor_trigger.event_type,
                    editor_trigger.conditions,
                );
                trigger.is_active = editor_trigger.is_active;
                if let Some(placeholder) = editor_trigger.id {
                    remapped.insert(placeholder, trigger.id.clone());
                }
                trigger
            }
        };
        upsert_triggers.push(trigger);
    }

    let now = chrono::Utc::now().timestamp();
    let mut upsert_actions = Vec::new();
    for editor_action in req.actions {
        // Actions may reference a trigger created in this same save
        let trigger_id = editor_action
            .trigger_id
            .map(|id| remapped.get(&id).cloned().unwrap_or(id));

        let existing = match &editor_action.id {
            Some(id) => core.storage.flows.get_action(id)?,
            None => None,
        };
        let action = match existing {
            Some(mut action) => {
                // Rebuild the editable surface, keep execution bookkeeping
                action.trigger_id = trigger_id;
                action.action_type = editor_action.spec.action_type();
                action.channel = editor_action.spec.channel();
                action.content = editor_action.spec.build_content();
                action.order_index = editor_action.order_index;
                action.delay_minutes = editor_action.spec.delay_minutes().max(0);
                if action.status == crate::models::ActionStatus::Pending {
                    action.scheduled_for = if action.delay_minutes > 0 {
                        Some(now + action.delay_minutes * 60)
                    } else {
                        None
                    };
                }
                action.updated_at = now;
                action
            }
            None => {
                let mut action = Action::new(
                    flow.id.clone(),
                    trigger_id,
                    &editor_action.spec,
                    editor_action.order_index,
                );
                if let Some(placeholder) = editor_action.id {
                    remapped.insert(placeholder, action.id.clone());
                }
                action.updated_at = now;
                action
            }
        };
        check_channel_supported(core, &action)?;
        upsert_actions.push(action);
    }

    core.storage
        .flows
        .apply_editor(crate::storage::EditorWrite {
            flow: Some(&flow),
            delete_trigger_ids: &req.delete_trigger_ids,
            delete_action_ids: &req.delete_action_ids,
            upsert_triggers: &upsert_triggers,
            upsert_actions: &upsert_actions,
        })
        .map_err(|e| EngineError::UpdateFailed(e.to_string()))?;

    info!(
        flow_id = %flow.id,
        triggers = upsert_triggers.len(),
        actions = upsert_actions.len(),
        "editor save applied"
    );
    Ok(EditorSaveResult {
        updated: true,
        flow_id: flow.id,
        remapped,
    })
}

#[derive(Debug, Serialize)]
pub struct PublishOutcome {
    pub published: bool,
    pub already_active: bool,
    /// Populated only by simulate
    pub issues: Vec<String>,
}

/// Publish moves Draft -> Active after checking the flow is runnable.
/// Publishing an Active flow is a no-op that leaves `updated_at` untouched.
/// With `simulate` the checks run and report without mutating anything.
pub async fn publish_flow(
    core: &AppCore,
    flow_id: &str,
    simulate: bool,
) -> Result<PublishOutcome, EngineError> {
    let mut flow = core
        .storage
        .flows
        .get_flow(flow_id)?
        .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
    let triggers = core.storage.flows.list_triggers_for_flow(flow_id)?;
    let actions = core.storage.flows.list_actions_for_flow(flow_id)?;

    if simulate {
        let mut issues = Vec::new();
        if flow.name.trim().is_empty() {
            issues.push("flow name is blank".to_string());
        }
        if triggers.is_empty() {
            issues.push("flow has no trigger".to_string());
        }
        if actions.is_empty() {
            issues.push("flow has no action".to_string());
        }
        return Ok(PublishOutcome {
            published: false,
            already_active: flow.status == FlowStatus::Active,
            issues,
        });
    }

    if flow.name.trim().is_empty() {
        return Err(EngineError::Validation("flow name is blank".into()));
    }
    if triggers.is_empty() {
        return Err(EngineError::NoTrigger);
    }
    if actions.is_empty() {
        return Err(EngineError::NoAction);
    }

    if flow.status == FlowStatus::Active {
        return Ok(PublishOutcome {
            published: false,
            already_active: true,
            issues: Vec::new(),
        });
    }

    flow.status = FlowStatus::Active;
    flow.touch();
    core.storage.flows.put_flow(&flow)?;
    info!(flow_id = %flow.id, "flow published");
    Ok(PublishOutcome {
        published: true,
        already_active: false,
        issues: Vec::new(),
    })
}

pub async fn set_enabled(core: &AppCore, flow_id: &str, enabled: bool) -> Result<Flow, EngineError> {
    let mut flow = core
        .storage
        .flows
        .get_flow(flow_id)?
        .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id}")))?;
    flow.enabled = enabled;
    flow.touch();
    core.storage.flows.put_flow(&flow)?;
    info!(flow_id = %flow.id, enabled, "flow toggled");
    Ok(flow)
}

pub async fn delete_flow(core: &AppCore, flow_id: &str) -> Result<(), EngineError> {
    if core.storage.flows.get_flow(flow_id)?.is_none() {
        return Err(EngineError::NotFound(format!("flow {flow_id}")));
    }
    core.storage.flows.delete_flow_cascade(flow_id)?;
    info!(flow_id, "flow deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionTypeDef, ConditionOp};
    use serde_json::json;
    use tempfile::tempdir;

    fn setup() -> (AppCore, tempfile::TempDir) {
        let tmp = tempdir().unwrap();
        let core = AppCore::new(tmp.path().join("test.db")).unwrap();
        (core, tmp)
    }

    fn email_spec() -> ActionSpec {
        ActionSpec::Email {
            to: vec!["ops@example.com".into()],
            subject: "s".into(),
            body: "b".into(),
            delay_minutes: 0,
        }
    }

    fn create_request(name: &str) -> CreateFlowRequest {
        CreateFlowRequest {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            created_by: None,
            trigger: Some(InlineTrigger {
                spec: TriggerSpec::Threshold {
                    field: "total".into(),
                    operator: ConditionOp::Gte,
                    value: json!(100),
                },
                event_type: Some("order.paid".into()),
            }),
            actions: vec![email_spec()],
        }
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let (core, _tmp) = setup();
        let err = create_flow(&core, create_request("  ")).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_create_with_inline_trigger_and_actions() {
        let (core, _tmp) = setup();
        let flow = create_flow(&core, create_request("welcome")).await.unwrap();

        let detail = get_flow_detail(&core, &flow.id).await.unwrap();
        assert_eq!(detail.flow.status, FlowStatus::Draft);
        assert_eq!(detail.triggers.len(), 1);
        assert_eq!(detail.triggers[0].event_type, "order.paid");
        assert_eq!(detail.actions.len(), 1);
        assert_eq!(detail.actions[0].action_type, "email");
    }

    #[tokio::test]
    async fn test_create_rejects_unsupported_channel() {
        let (core, _tmp) = setup();
        core.storage
            .catalog
            .upsert_action_type(&ActionTypeDef {
                key: "email".into(),
                display_name: "Email".into(),
                description: String::new(),
                schema: Value::Null,
                is_active: true,
                supported_channels: vec!["sms".into()],
            })
            .unwrap();

        let err = create_flow(&core, create_request("x")).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        // Nothing persisted
        assert!(list_flows(&core).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_requires_trigger_and_action() {
        let (core, _tmp) = setup();
        let mut req = create_request("lonely");
        req.trigger = None;
        req.actions = Vec::new();
        let flow = create_flow(&core, req).await.unwrap();

        let err = publish_flow(&core, &flow.id, false).await.unwrap_err();
        assert_eq!(err.code(), "NO_TRIGGER");

        save_editor(
            &core,
            &flow.id,
            EditorSaveRequest {
                is_new_record: true,
                triggers: vec![EditorTrigger {
                    id: None,
                    event_type: "order.paid".into(),
                    conditions: Map::new(),
                    is_active: true,
                }],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let err = publish_flow(&core, &flow.id, false).await.unwrap_err();
        assert_eq!(err.code(), "NO_ACTION");
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let (core, _tmp) = setup();
        let flow = create_flow(&core, create_request("pub")).await.unwrap();

        let first = publish_flow(&core, &flow.id, false).await.unwrap();
        assert!(first.published);
        let stamped = core.storage.flows.get_flow(&flow.id).unwrap().unwrap();

        let second = publish_flow(&core, &flow.id, false).await.unwrap();
        assert!(!second.published);
        assert!(second.already_active);
        let untouched = core.storage.flows.get_flow(&flow.id).unwrap().unwrap();
        assert_eq!(untouched.updated_at, stamped.updated_at);
    }

    #[tokio::test]
    async fn test_simulate_reports_issues_without_mutating() {
        let (core, _tmp) = setup();
        let mut req = create_request("sim");
        req.trigger = None;
        req.actions = Vec::new();
        let flow = create_flow(&core, req).await.unwrap();

        let outcome = publish_flow(&core, &flow.id, true).await.unwrap();
        assert!(!outcome.published);
        assert_eq!(outcome.issues.len(), 2);
        let stored = core.storage.flows.get_flow(&flow.id).unwrap().unwrap();
        assert_eq!(stored.status, FlowStatus::Draft);
    }

    #[tokio::test]
    async fn test_editor_noop_when_nothing_changed() {
        let (core, _tmp) = setup();
        let flow = create_flow(&core, create_request("noop")).await.unwrap();

        let result = save_editor(&core, &flow.id, EditorSaveRequest::default())
            .await
            .unwrap();
        assert!(!result.updated);
    }

    #[tokio::test]
    async fn test_editor_remaps_placeholder_trigger_ids() {
        let (core, _tmp) = setup();
        let mut req = create_request("remap");
        req.trigger = None;
        req.actions = Vec::new();
        let flow = create_flow(&core, req).await.unwrap();

        let result = save_editor(
            &core,
            &flow.id,
            EditorSaveRequest {
                is_new_record: true,
                triggers: vec![EditorTrigger {
                    id: Some("tmp-1".into()),
                    event_type: "order.paid".into(),
                    conditions: Map::new(),
                    is_active: true,
                }],
                actions: vec![EditorAction {
                    id: None,
                    trigger_id: Some("tmp-1".into()),
                    spec: email_spec(),
                    order_index: 0,
                }],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(result.updated);
        let new_trigger_id = result.remapped.get("tmp-1").unwrap();
        assert!(new_trigger_id.starts_with("trg_"));

        let detail = get_flow_detail(&core, &flow.id).await.unwrap();
        assert_eq!(detail.actions[0].trigger_id.as_deref(), Some(new_trigger_id.as_str()));
    }

    #[tokio::test]
    async fn test_editor_deletes_children() {
        let (core, _tmp) = setup();
        let flow = create_flow(&core, create_request("trim")).await.unwrap();
        let detail = get_flow_detail(&core, &flow.id).await.unwrap();

        save_editor(
            &core,
            &flow.id,
            EditorSaveRequest {
                is_new_record: true,
                delete_trigger_ids: vec![detail.triggers[0].id.clone()],
                delete_action_ids: vec![detail.actions[0].id.clone()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let detail = get_flow_detail(&core, &flow.id).await.unwrap();
        assert!(detail.triggers.is_empty());
        assert!(detail.actions.is_empty());
    }

    #[tokio::test]
    async fn test_set_enabled_and_delete() {
        let (core, _tmp) = setup();
        let flow = create_flow(&core, create_request("toggle")).await.unwrap();

        let toggled = set_enabled(&core, &flow.id, false).await.unwrap();
        assert!(!toggled.enabled);

        delete_flow(&core, &flow.id).await.unwrap();
        let err = get_flow_detail(&core, &flow.id).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
