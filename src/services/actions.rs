use crate::AppCore;
use crate::error::EngineError;
use crate::models::Action;

/// Pending actions whose due time has passed, ascending by due time.
pub async fn list_actions_due(core: &AppCore, now: i64) -> Result<Vec<Action>, EngineError> {
    Ok(core.storage.flows.find_due(now)?)
}

pub async fn mark_action_sent(
    core: &AppCore,
    action_id: &str,
    timestamp: i64,
) -> Result<Action, EngineError> {
    core.storage
        .flows
        .mark_action_sent(action_id, timestamp)?
        .ok_or_else(|| EngineError::NotFound(format!("action {action_id}")))
}

pub async fn mark_action_failed(
    core: &AppCore,
    action_id: &str,
    reason: &str,
) -> Result<Action, EngineError> {
    core.storage
        .flows
        .mark_action_failed(action_id, reason)?
        .ok_or_else(|| EngineError::NotFound(format!("action {action_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionSpec, ActionStatus, Flow};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_mark_operations_surface_not_found() {
        let tmp = tempdir().unwrap();
        let core = AppCore::new(tmp.path().join("test.db")).unwrap();

        let err = mark_action_sent(&core, "act_missing", 0).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        let err = mark_action_failed(&core, "act_missing", "x").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_due_listing_and_marking() {
        let tmp = tempdir().unwrap();
        let core = AppCore::new(tmp.path().join("test.db")).unwrap();

        let flow = Flow::new("f".into(), String::new(), None);
        let mut action = Action::new(
            flow.id.clone(),
            None,
            &ActionSpec::Email {
                to: vec!["ops@example.com".into()],
                subject: "s".into(),
                body: "b".into(),
                delay_minutes: 5,
            },
            0,
        );
        let now = chrono::Utc::now().timestamp();
        action.scheduled_for = Some(now - 10);
        core.storage
            .flows
            .create_flow_bundle(&flow, &[], &[action.clone()])
            .unwrap();

        let due = list_actions_due(&core, now).await.unwrap();
        assert_eq!(due.len(), 1);

        let sent = mark_action_sent(&core, &action.id, now).await.unwrap();
        assert_eq!(sent.status, ActionStatus::Sent);
        assert!(list_actions_due(&core, now).await.unwrap().is_empty());
    }
}
