use crate::channel::ChannelRegistry;
use crate::engine::context::ExecutionContext;
use crate::engine::matcher::{clauses_met, sort_actions};
use crate::models::{Action, ActionStatus, Condition, Flow, Trigger};
use crate::storage::Storage;
use anyhow::Result;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Renders and executes a flow's actions in order, owns sent/failed
/// bookkeeping, and runs the delayed-action due poller.
pub struct ActionDispatcher {
    storage: Arc<Storage>,
    channels: Arc<ChannelRegistry>,
    dispatch_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(
        storage: Arc<Storage>,
        channels: Arc<ChannelRegistry>,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            channels,
            dispatch_timeout,
        }
    }

    /// Execute a matched flow's actions sequentially in sorted order. Each
    /// action is awaited before the next starts, since later actions may read
    /// state (context vars) mutated by earlier ones. Per-action failures are
    /// recorded and never abort the remainder of the flow.
    pub async fn run_flow(
        &self,
        flow: &Flow,
        trigger: &Trigger,
        actions: &[Action],
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let mut ordered = actions.to_vec();
        sort_actions(&mut ordered);

        info!(flow_id = %flow.id, trigger_id = %trigger.id, actions = ordered.len(), "running flow");

        let now = chrono::Utc::now().timestamp();
        for action in &ordered {
            if action.status != ActionStatus::Pending {
                continue;
            }
            match action.action_type.as_str() {
                "conditional" => self.apply_conditional(action, ctx)?,
                // Realized entirely through scheduled_for; nothing to send
                "delay" => {
                    if action.scheduled_for.is_some_and(|at| at > now) {
                        debug!(action_id = %action.id, scheduled_for = ?action.scheduled_for, "action deferred");
                        continue;
                    }
                    self.storage.flows.mark_action_sent(&action.id, now)?;
                }
                _ => {
                    let rendered = ctx.interpolate_map(&action.content);
                    if action.scheduled_for.is_some_and(|at| at > now) {
                        // Persist the rendered content so the due poller can
                        // dispatch later without the execution context
                        let mut delayed = action.clone();
                        delayed.content = rendered;
                        delayed.updated_at = now;
                        self.storage.flows.put_action(&delayed)?;
                        debug!(action_id = %action.id, scheduled_for = ?action.scheduled_for, "action deferred");
                        continue;
                    }
                    self.dispatch(action, &rendered).await?;
                }
            }
        }
        Ok(())
    }

    /// Send one action through its channel with the bounded timeout and record
    /// the outcome. Unknown action types are logged and skipped.
    async fn dispatch(&self, action: &Action, content: &Map<String, Value>) -> Result<()> {
        let Some(sender) = self.channels.get(&action.action_type) else {
            warn!(
                action_id = %action.id,
                action_type = %action.action_type,
                "no handler registered for action type, skipping"
            );
            return Ok(());
        };

        let outcome = tokio::time::timeout(self.dispatch_timeout, sender.send(content)).await;
        let now = chrono::Utc::now().timestamp();
        match outcome {
            Ok(Ok(())) => {
                self.storage.flows.mark_action_sent(&action.id, now)?;
                debug!(action_id = %action.id, action_type = %action.action_type, "action sent");
            }
            Ok(Err(e)) => {
                warn!(action_id = %action.id, error = %e, "channel send failed");
                self.storage.flows.mark_action_failed(&action.id, &e.to_string())?;
            }
            Err(_) => {
                let reason = format!(
                    "dispatch timed out after {}s",
                    self.dispatch_timeout.as_secs()
                );
                warn!(action_id = %action.id, "{reason}");
                self.storage.flows.mark_action_failed(&action.id, &reason)?;
            }
        }
        Ok(())
    }

    /// Conditional actions gate a side effect on a clause list evaluated
    /// against the execution context. Evaluation failures default to
    /// "condition not met".
    fn apply_conditional(&self, action: &Action, ctx: &mut ExecutionContext) -> Result<()> {
        let clauses: Vec<Condition> = action
            .content
            .get("clauses")
            .cloned()
            .and_then(|raw| serde_json::from_value(raw).ok())
            .unwrap_or_default();

        let met = clauses_met(&clauses, ctx.root());
        if met {
            if let Some(Value::Object(patch)) = action.content.get("set") {
                for (key, value) in patch {
                    ctx.set_var(key, value.clone());
                }
            }
            debug!(action_id = %action.id, "conditional matched, context patched");
        } else {
            debug!(action_id = %action.id, "conditional not met");
        }
        self.storage
            .flows
            .mark_action_sent(&action.id, chrono::Utc::now().timestamp())?;
        Ok(())
    }

    /// Dispatch every delayed action that has come due. Content was rendered
    /// at flow-run time, so sends go straight to the channel.
    pub async fn run_due(&self, now: i64) -> Result<usize> {
        let due = self.storage.flows.find_due(now)?;
        let mut dispatched = 0;
        for action in due {
            match action.action_type.as_str() {
                "conditional" | "delay" => {
                    self.storage.flows.mark_action_sent(&action.id, now)?;
                }
                _ => {
                    self.dispatch(&action, &action.content).await?;
                }
            }
            dispatched += 1;
        }
        if dispatched > 0 {
            info!(count = dispatched, "due actions dispatched");
        }
        Ok(dispatched)
    }
}
