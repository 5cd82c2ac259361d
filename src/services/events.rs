use crate::AppCore;
use crate::error::EngineError;
use crate::models::Event;
use crate::storage::Delivery;
use serde_json::Value;
use tracing::info;

/// Publish an external event into the ingestion queue. Returns the queue
/// receipt; processing happens asynchronously in the ingest workers.
pub async fn trigger_event(
    core: &AppCore,
    event_type: &str,
    payload: Value,
) -> Result<String, EngineError> {
    if event_type.trim().is_empty() {
        return Err(EngineError::Validation("event type is required".into()));
    }
    let event = Event::new(event_type.to_string(), payload);
    let receipt = core.storage.events.push(&event)?;
    info!(event_id = %event.id, event_type, "event queued");
    Ok(receipt)
}

/// Deliveries that exhausted handling and were parked. Exposed for operator
/// inspection.
pub async fn list_dead_letters(core: &AppCore) -> Result<Vec<Delivery>, EngineError> {
    Ok(core.storage.events.list_dead_letters()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_trigger_event_enqueues() {
        let tmp = tempdir().unwrap();
        let core = AppCore::new(tmp.path().join("test.db")).unwrap();

        let receipt = trigger_event(&core, "order.paid", json!({"orderId": 1}))
            .await
            .unwrap();
        assert!(receipt.starts_with("rcpt_"));
        assert_eq!(core.storage.events.pending_count().unwrap(), 1);

        let err = trigger_event(&core, "  ", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
