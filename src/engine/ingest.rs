use crate::engine::context::ExecutionContext;
use crate::engine::dispatcher::ActionDispatcher;
use crate::engine::matcher::{TriggerMatcher, conditions_met};
use crate::models::Event;
use crate::storage::queue::Delivery;
use crate::storage::{NackPolicy, Storage};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Consumes events off the queue and fans each one out to every flow whose
/// trigger matches. Delivery is at-least-once: an event is acked only after
/// every matched flow has run.
pub struct EventIngestor {
    storage: Arc<Storage>,
    matcher: TriggerMatcher,
    dispatcher: Arc<ActionDispatcher>,
}

impl EventIngestor {
    pub fn new(storage: Arc<Storage>, dispatcher: Arc<ActionDispatcher>) -> Self {
        let matcher = TriggerMatcher::new(storage.clone());
        Self {
            storage,
            matcher,
            dispatcher,
        }
    }

    /// Run every flow that matches the event. Returns how many flows ran.
    ///
    /// Matching is two-phase: the store narrows by event type, then each
    /// candidate trigger's condition clauses are evaluated against the
    /// payload before its flow runs.
    pub async fn handle_event(&self, event: &Event) -> Result<usize> {
        let candidates = self.matcher.find_flows_for_event(&event.event_type)?;
        if candidates.is_empty() {
            debug!(event_type = %event.event_type, "no flows match event type");
            return Ok(0);
        }

        let entity = event
            .payload
            .get("entity")
            .cloned()
            .unwrap_or(Value::Null);

        let mut ran = 0;
        for candidate in candidates {
            if !conditions_met(&candidate.trigger, &event.payload) {
                debug!(
                    trigger_id = %candidate.trigger.id,
                    "trigger conditions not met, skipping flow"
                );
                continue;
            }
            let mut ctx = ExecutionContext::new(event.payload.clone(), entity.clone());
            self.dispatcher
                .run_flow(
                    &candidate.flow,
                    &candidate.trigger,
                    &candidate.actions,
                    &mut ctx,
                )
                .await?;
            ran += 1;
        }

        info!(event_id = %event.id, event_type = %event.event_type, flows = ran, "event handled");
        Ok(ran)
    }

    /// Process one delivery to completion: parse, handle, then ack or nack.
    ///
    /// An unparsable body is poison. Retrying it can never succeed, so it is
    /// acked and dropped instead of cycling through the queue.
    pub async fn process(&self, delivery: Delivery) -> Result<()> {
        let event: Event = match serde_json::from_str(&delivery.body) {
            Ok(event) => event,
            Err(e) => {
                warn!(receipt = %delivery.receipt, error = %e, "unparsable event body, dropping");
                return self.storage.events.ack(&delivery.receipt);
            }
        };

        match self.handle_event(&event).await {
            Ok(_) => self.storage.events.ack(&delivery.receipt),
            Err(e) => {
                let requeue = self.storage.config.current().nack_policy == NackPolicy::Requeue;
                error!(
                    event_id = %event.id,
                    attempts = delivery.attempts,
                    requeue,
                    error = ?e,
                    "event handling failed"
                );
                self.storage.events.nack(&delivery.receipt, requeue)
            }
        }
    }

    /// Spawn `prefetch` worker tasks, each pulling from the shared queue.
    pub fn start(self: &Arc<Self>, prefetch: usize) {
        for worker in 0..prefetch {
            let ingestor = self.clone();
            tokio::spawn(async move {
                debug!(worker, "ingest worker started");
                loop {
                    match ingestor.storage.events.pop().await {
                        Ok(delivery) => {
                            if let Err(e) = ingestor.process(delivery).await {
                                error!(worker, error = ?e, "delivery processing failed");
                            }
                        }
                        Err(e) => {
                            error!(worker, error = ?e, "queue pop failed");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            });
        }
        info!(workers = prefetch, "event ingestion started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelRegistry, LogSender};
    use crate::models::{Action, ActionSpec, ActionStatus, Flow, FlowStatus, Trigger, TriggerSpec};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn setup() -> (Arc<EventIngestor>, Arc<Storage>, tempfile::TempDir) {
        let tmp = tempdir().unwrap();
        let storage = Arc::new(Storage::new(tmp.path().join("test.db")).unwrap());
        let mut registry = ChannelRegistry::new();
        registry.register("email", Arc::new(LogSender::new("email")));
        let dispatcher = Arc::new(ActionDispatcher::new(
            storage.clone(),
            Arc::new(registry),
            Duration::from_secs(5),
        ));
        let ingestor = Arc::new(EventIngestor::new(storage.clone(), dispatcher));
        (ingestor, storage, tmp)
    }

    fn seed_active_flow(
        storage: &Storage,
        event_type: &str,
        conditions: serde_json::Map<String, Value>,
    ) -> (Flow, Action) {
        let mut flow = Flow::new("f".into(), String::new(), None);
        flow.status = FlowStatus::Active;
        let trigger = Trigger::new(flow.id.clone(), event_type.into(), conditions);
        let action = Action::new(
            flow.id.clone(),
            None,
            &ActionSpec::Email {
                to: vec!["ops@example.com".into()],
                subject: "order {{payload.orderId}}".into(),
                body: "b".into(),
                delay_minutes: 0,
            },
            0,
        );
        storage
            .flows
            .create_flow_bundle(&flow, &[trigger], &[action.clone()])
            .unwrap();
        (flow, action)
    }

    #[tokio::test]
    async fn test_handle_event_runs_matching_flow() {
        let (ingestor, storage, _tmp) = setup();
        let (_, action) = seed_active_flow(&storage, "order.paid", Default::default());

        let event = Event::new("order.paid".into(), json!({"orderId": 9}));
        let ran = ingestor.handle_event(&event).await.unwrap();
        assert_eq!(ran, 1);

        let stored = storage.flows.get_action(&action.id).unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Sent);
        assert!(stored.executed_at.is_some());
    }

    #[tokio::test]
    async fn test_unmet_conditions_skip_flow() {
        let (ingestor, storage, _tmp) = setup();
        let spec = TriggerSpec::Threshold {
            field: "total".into(),
            operator: crate::models::ConditionOp::Gte,
            value: json!(100),
        };
        let (_, action) = seed_active_flow(&storage, "order.paid", spec.build_conditions());

        let event = Event::new("order.paid".into(), json!({"total": 10}));
        let ran = ingestor.handle_event(&event).await.unwrap();
        assert_eq!(ran, 0);

        let stored = storage.flows.get_action(&action.id).unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Pending);
    }

    #[tokio::test]
    async fn test_poison_body_acked_and_dropped() {
        let (ingestor, storage, _tmp) = setup();
        storage.events.push_raw("{ not json").unwrap();

        let delivery = storage.events.try_pop().unwrap().unwrap();
        ingestor.process(delivery).await.unwrap();

        assert_eq!(storage.events.pending_count().unwrap(), 0);
        assert_eq!(storage.events.dead_letter_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_process_acks_handled_event() {
        let (ingestor, storage, _tmp) = setup();
        seed_active_flow(&storage, "order.paid", Default::default());
        storage
            .events
            .push(&Event::new("order.paid".into(), json!({"orderId": 1})))
            .unwrap();

        let delivery = storage.events.try_pop().unwrap().unwrap();
        ingestor.process(delivery).await.unwrap();

        assert_eq!(storage.events.pending_count().unwrap(), 0);
        assert_eq!(storage.events.dead_letter_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_workers_drain_queue() {
        let (ingestor, storage, _tmp) = setup();
        let (_, action) = seed_active_flow(&storage, "order.paid", Default::default());

        ingestor.start(2);
        storage
            .events
            .push(&Event::new("order.paid".into(), json!({"orderId": 3})))
            .unwrap();

        // Poll until the worker has processed the event
        for _ in 0..50 {
            let stored = storage.flows.get_action(&action.id).unwrap().unwrap();
            if stored.status == ActionStatus::Sent {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("event was not processed by workers");
    }
}
