use crate::models::{Action, Flow, Trigger};
use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

pub const FLOW_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("flows");
pub const TRIGGER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("triggers");
pub const ACTION_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");

/// Everything the editor save writes in one transaction: an optional flow
/// patch, child deletions, and trigger/action upserts (ids already remapped
/// by the caller).
pub struct EditorWrite<'a> {
    pub flow: Option<&'a Flow>,
    pub delete_trigger_ids: &'a [String],
    pub delete_action_ids: &'a [String],
    pub upsert_triggers: &'a [Trigger],
    pub upsert_actions: &'a [Action],
}

pub struct FlowStore {
    db: Arc<Database>,
}

impl FlowStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(FLOW_TABLE)?;
        write_txn.open_table(TRIGGER_TABLE)?;
        write_txn.open_table(ACTION_TABLE)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Insert a flow with its triggers and actions atomically. Any row
    /// failing the insert guard aborts the whole transaction, so a reader
    /// never observes a flow with some-but-not-all of its children.
    pub fn create_flow_bundle(
        &self,
        flow: &Flow,
        triggers: &[Trigger],
        actions: &[Action],
    ) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut flow_table = write_txn.open_table(FLOW_TABLE)?;
            flow_table.insert(flow.id.as_str(), serde_json::to_vec(flow)?.as_slice())?;

            let mut trigger_table = write_txn.open_table(TRIGGER_TABLE)?;
            for trigger in triggers {
                trigger_table
                    .insert(trigger.id.as_str(), serde_json::to_vec(trigger)?.as_slice())?;
            }

            let mut action_table = write_txn.open_table(ACTION_TABLE)?;
            for action in actions {
                validate_for_insert(action)?;
                action_table.insert(action.id.as_str(), serde_json::to_vec(action)?.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn apply_editor(&self, write: EditorWrite) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            if let Some(flow) = write.flow {
                let mut flow_table = write_txn.open_table(FLOW_TABLE)?;
                flow_table.insert(flow.id.as_str(), serde_json::to_vec(flow)?.as_slice())?;
            }

            let mut trigger_table = write_txn.open_table(TRIGGER_TABLE)?;
            for id in write.delete_trigger_ids {
                trigger_table.remove(id.as_str())?;
            }
            for trigger in write.upsert_triggers {
                trigger_table
                    .insert(trigger.id.as_str(), serde_json::to_vec(trigger)?.as_slice())?;
            }

            let mut action_table = write_txn.open_table(ACTION_TABLE)?;
            for id in write.delete_action_ids {
                action_table.remove(id.as_str())?;
            }
            for action in write.upsert_actions {
                validate_for_insert(action)?;
                action_table.insert(action.id.as_str(), serde_json::to_vec(action)?.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_flow(&self, id: &str) -> Result<Option<Flow>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FLOW_TABLE)?;
        if let Some(value) = table.get(id)? {
            Ok(Some(serde_json::from_slice(value.value())?))
        } else {
            Ok(None)
        }
    }

    pub fn list_flows(&self) -> Result<Vec<Flow>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FLOW_TABLE)?;
        let mut flows = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            flows.push(serde_json::from_slice(value.value())?);
        }
        Ok(flows)
    }

    pub fn put_flow(&self, flow: &Flow) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FLOW_TABLE)?;
            table.insert(flow.id.as_str(), serde_json::to_vec(flow)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Delete a flow and everything it owns in one transaction.
    pub fn delete_flow_cascade(&self, flow_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut flow_table = write_txn.open_table(FLOW_TABLE)?;
            flow_table.remove(flow_id)?;

            let mut trigger_table = write_txn.open_table(TRIGGER_TABLE)?;
            let trigger_ids: Vec<String> = {
                let mut ids = Vec::new();
                for item in trigger_table.iter()? {
                    let (key, value) = item?;
                    let trigger: Trigger = serde_json::from_slice(value.value())?;
                    if trigger.flow_id == flow_id {
                        ids.push(key.value().to_string());
                    }
                }
                ids
            };
            for id in trigger_ids {
                trigger_table.remove(id.as_str())?;
            }

            let mut action_table = write_txn.open_table(ACTION_TABLE)?;
            let action_ids: Vec<String> = {
                let mut ids = Vec::new();
                for item in action_table.iter()? {
                    let (key, value) = item?;
                    let action: Action = serde_json::from_slice(value.value())?;
                    if action.flow_id == flow_id {
                        ids.push(key.value().to_string());
                    }
                }
                ids
            };
            for id in action_ids {
                action_table.remove(id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_trigger(&self, id: &str) -> Result<Option<Trigger>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRIGGER_TABLE)?;
        if let Some(value) = table.get(id)? {
            Ok(Some(serde_json::from_slice(value.value())?))
        } else {
            Ok(None)
        }
    }

    pub fn list_triggers_for_flow(&self, flow_id: &str) -> Result<Vec<Trigger>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRIGGER_TABLE)?;
        let mut triggers = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let trigger: Trigger = serde_json::from_slice(value.value())?;
            if trigger.flow_id == flow_id {
                triggers.push(trigger);
            }
        }
        Ok(triggers)
    }

    /// First matching phase: active triggers narrowed by event type only.
    pub fn list_active_triggers_by_event(&self, event_type: &str) -> Result<Vec<Trigger>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRIGGER_TABLE)?;
        let mut triggers = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let trigger: Trigger = serde_json::from_slice(value.value())?;
            if trigger.is_active && trigger.event_type == event_type {
                triggers.push(trigger);
            }
        }
        Ok(triggers)
    }

    pub fn get_action(&self, id: &str) -> Result<Option<Action>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACTION_TABLE)?;
        if let Some(value) = table.get(id)? {
            Ok(Some(serde_json::from_slice(value.value())?))
        } else {
            Ok(None)
        }
    }

    pub fn put_action(&self, action: &Action) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACTION_TABLE)?;
            table.insert(action.id.as_str(), serde_json::to_vec(action)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn list_actions_for_flow(&self, flow_id: &str) -> Result<Vec<Action>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACTION_TABLE)?;
        let mut actions = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let action: Action = serde_json::from_slice(value.value())?;
            if action.flow_id == flow_id {
                actions.push(action);
            }
        }
        Ok(actions)
    }

    /// Pending actions whose due time has passed, ascending by due time.
    /// This is the query the delayed-dispatch poller runs.
    pub fn find_due(&self, now: i64) -> Result<Vec<Action>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACTION_TABLE)?;
        let mut due = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            let action: Action = serde_json::from_slice(value.value())?;
            if action.is_due(now) {
                due.push(action);
            }
        }
        due.sort_by_key(|a| a.scheduled_for);
        Ok(due)
    }

    pub fn mark_action_sent(&self, action_id: &str, timestamp: i64) -> Result<Option<Action>> {
        self.update_action(action_id, |action| action.mark_sent(timestamp))
    }

    pub fn mark_action_failed(&self, action_id: &str, reason: &str) -> Result<Option<Action>> {
        self.update_action(action_id, |action| action.mark_failed(reason))
    }

    fn update_action<F>(&self, action_id: &str, mutate: F) -> Result<Option<Action>>
    where
        F: FnOnce(&mut Action),
    {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(ACTION_TABLE)?;
            let existing = match table.get(action_id)? {
                Some(value) => Some(serde_json::from_slice::<Action>(value.value())?),
                None => None,
            };
            match existing {
                Some(mut action) => {
                    mutate(&mut action);
                    table.insert(action_id, serde_json::to_vec(&action)?.as_slice())?;
                    Some(action)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }
}

/// Insert-time guard: rows that can never dispatch are refused so the
/// enclosing transaction rolls back instead of persisting a broken flow.
fn validate_for_insert(action: &Action) -> Result<()> {
    if matches!(action.action_type.as_str(), "email" | "sms" | "push") {
        let recipients = action
            .content
            .get("to")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("action {} has no recipient list", action.id))?;
        if recipients.is_empty() {
            return Err(anyhow::anyhow!("action {} has an empty recipient list", action.id));
        }
        if action.action_type == "email" {
            for recipient in recipients {
                let addr = recipient.as_str().unwrap_or_default();
                // Template placeholders are resolved at dispatch time
                if !addr.contains('@') && !addr.contains("{{") {
                    return Err(anyhow::anyhow!("invalid email recipient '{addr}'"));
                }
            }
        }
    }
    if action.delay_minutes < 0 {
        return Err(anyhow::anyhow!("action {} has negative delay", action.id));
    }
    Ok(())
}
