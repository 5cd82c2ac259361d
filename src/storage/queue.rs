use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

use crate::models::Event;

const PENDING_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("events_pending");
const PROCESSING_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("events_processing");
const DEAD_LETTER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("events_dead_letter");

/// Queue-level wrapper around a raw event body. The queue always controls
/// this envelope, so it always parses; the `body` inside may still be junk,
/// which is the consumer's poison-message case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub receipt: String,
    pub attempts: u32,
    pub body: String,
    pub enqueued_at: i64,
    /// Set when the delivery moves to processing; stall recovery keys off it
    #[serde(default)]
    pub popped_at: Option<i64>,
}

/// At-least-once event queue over redb: pending (ordered), processing
/// (in-flight), dead-letter. Consumers pop, then ack or nack.
pub struct EventQueue {
    db: Arc<Database>,
    notify: Arc<Notify>,
    seq: AtomicU64,
}

impl EventQueue {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(PENDING_TABLE)?;
        write_txn.open_table(PROCESSING_TABLE)?;
        write_txn.open_table(DEAD_LETTER_TABLE)?;
        write_txn.commit()?;

        Ok(Self {
            db,
            notify: Arc::new(Notify::new()),
            seq: AtomicU64::new(0),
        })
    }

    /// Publish a well-formed event.
    pub fn push(&self, event: &Event) -> Result<String> {
        self.push_raw(&serde_json::to_string(event)?)
    }

    /// Publish a raw body. Used by tests to inject unparsable payloads; the
    /// consumer is expected to ack-drop those rather than retry forever.
    pub fn push_raw(&self, body: &str) -> Result<String> {
        let delivery = Delivery {
            receipt: format!("rcpt_{}", uuid::Uuid::new_v4()),
            attempts: 0,
            body: body.to_string(),
            enqueued_at: chrono::Utc::now().timestamp(),
            popped_at: None,
        };
        let receipt = delivery.receipt.clone();
        self.insert_pending(&delivery)?;
        self.notify.notify_one();
        Ok(receipt)
    }

    fn insert_pending(&self, delivery: &Delivery) -> Result<()> {
        // Millisecond timestamp plus a sequence counter keeps FIFO order even
        // for same-millisecond pushes
        let priority = (chrono::Utc::now().timestamp_millis() as u64) << 16
            | (self.seq.fetch_add(1, Ordering::Relaxed) & 0xffff);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_TABLE)?;
            table.insert(priority, serde_json::to_vec(delivery)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Pop the next delivery, waiting if the queue is empty.
    pub async fn pop(&self) -> Result<Delivery> {
        loop {
            match self.try_pop()? {
                Some(delivery) => return Ok(delivery),
                None => self.notify.notified().await,
            }
        }
    }

    /// Pop without blocking; moves the delivery to the processing table.
    pub fn try_pop(&self) -> Result<Option<Delivery>> {
        let write_txn = self.db.begin_write()?;
        let delivery = {
            let mut pending = write_txn.open_table(PENDING_TABLE)?;
            let first = match pending.first()? {
                Some((key, value)) => {
                    Some((key.value(), serde_json::from_slice::<Delivery>(value.value())?))
                }
                None => None,
            };
            match first {
                Some((key, mut delivery)) => {
                    pending.remove(key)?;
                    delivery.popped_at = Some(chrono::Utc::now().timestamp());
                    let mut processing = write_txn.open_table(PROCESSING_TABLE)?;
                    processing.insert(
                        delivery.receipt.as_str(),
                        serde_json::to_vec(&delivery)?.as_slice(),
                    )?;
                    Some(delivery)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(delivery)
    }

    /// Acknowledge: the delivery is done (or dropped) and leaves the queue.
    pub fn ack(&self, receipt: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut processing = write_txn.open_table(PROCESSING_TABLE)?;
            processing.remove(receipt)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Negative-acknowledge. `requeue` sends the delivery back to pending
    /// with its attempt counter bumped; otherwise it goes to the dead-letter
    /// table, bounding retry storms.
    pub fn nack(&self, receipt: &str, requeue: bool) -> Result<()> {
        let delivery = {
            let write_txn = self.db.begin_write()?;
            let taken = {
                let mut processing = write_txn.open_table(PROCESSING_TABLE)?;
                let existing = match processing.get(receipt)? {
                    Some(value) => Some(serde_json::from_slice::<Delivery>(value.value())?),
                    None => None,
                };
                if existing.is_some() {
                    processing.remove(receipt)?;
                }
                existing
            };
            write_txn.commit()?;
            taken
        };

        let Some(mut delivery) = delivery else {
            return Ok(());
        };
        delivery.attempts += 1;

        if requeue {
            self.insert_pending(&delivery)?;
            self.notify.notify_one();
        } else {
            let write_txn = self.db.begin_write()?;
            {
                let mut dead = write_txn.open_table(DEAD_LETTER_TABLE)?;
                dead.insert(
                    delivery.receipt.as_str(),
                    serde_json::to_vec(&delivery)?.as_slice(),
                )?;
            }
            write_txn.commit()?;
        }
        Ok(())
    }

    /// Requeue deliveries stuck in the processing table longer than the
    /// stall timeout. A worker that died between pop and ack leaves its
    /// delivery there; without this pass the event would be lost.
    pub fn recover_stalled(&self, stall_timeout_seconds: i64) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() - stall_timeout_seconds;
        let stalled: Vec<Delivery> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(PROCESSING_TABLE)?;
            let mut stalled = Vec::new();
            for item in table.iter()? {
                let (_, value) = item?;
                let delivery: Delivery = serde_json::from_slice(value.value())?;
                if delivery.popped_at.is_none_or(|at| at <= cutoff) {
                    stalled.push(delivery);
                }
            }
            stalled
        };

        let mut recovered = 0;
        for mut delivery in stalled {
            let write_txn = self.db.begin_write()?;
            let removed = {
                let mut processing = write_txn.open_table(PROCESSING_TABLE)?;
                processing.remove(delivery.receipt.as_str())?.is_some()
            };
            write_txn.commit()?;
            if !removed {
                // Acked or nacked between the scan and this write
                continue;
            }
            delivery.attempts += 1;
            delivery.popped_at = None;
            self.insert_pending(&delivery)?;
            self.notify.notify_one();
            recovered += 1;
        }
        Ok(recovered)
    }

    pub fn pending_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_TABLE)?;
        let mut count = 0;
        for item in table.iter()? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn dead_letter_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEAD_LETTER_TABLE)?;
        let mut count = 0;
        for item in table.iter()? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn list_dead_letters(&self) -> Result<Vec<Delivery>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEAD_LETTER_TABLE)?;
        let mut deliveries = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            deliveries.push(serde_json::from_slice(value.value())?);
        }
        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn setup() -> (EventQueue, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        (EventQueue::new(db).unwrap(), temp_dir)
    }

    #[test]
    fn test_push_pop_ack() {
        let (queue, _tmp) = setup();
        let event = Event::new("order.paid".into(), json!({"orderId": 1}));
        queue.push(&event).unwrap();

        let delivery = queue.try_pop().unwrap().unwrap();
        let parsed: Event = serde_json::from_str(&delivery.body).unwrap();
        assert_eq!(parsed.event_type, "order.paid");
        assert_eq!(delivery.attempts, 0);

        queue.ack(&delivery.receipt).unwrap();
        assert!(queue.try_pop().unwrap().is_none());
        assert_eq!(queue.dead_letter_count().unwrap(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let (queue, _tmp) = setup();
        for i in 0..3 {
            queue
                .push(&Event::new(format!("e{i}"), json!(null)))
                .unwrap();
        }
        for i in 0..3 {
            let delivery = queue.try_pop().unwrap().unwrap();
            let event: Event = serde_json::from_str(&delivery.body).unwrap();
            assert_eq!(event.event_type, format!("e{i}"));
            queue.ack(&delivery.receipt).unwrap();
        }
    }

    #[test]
    fn test_nack_requeue_bumps_attempts() {
        let (queue, _tmp) = setup();
        queue.push(&Event::new("x".into(), json!(null))).unwrap();

        let delivery = queue.try_pop().unwrap().unwrap();
        queue.nack(&delivery.receipt, true).unwrap();

        let redelivered = queue.try_pop().unwrap().unwrap();
        assert_eq!(redelivered.attempts, 1);
        assert_eq!(redelivered.body, delivery.body);
    }

    #[test]
    fn test_nack_dead_letter() {
        let (queue, _tmp) = setup();
        queue.push(&Event::new("x".into(), json!(null))).unwrap();

        let delivery = queue.try_pop().unwrap().unwrap();
        queue.nack(&delivery.receipt, false).unwrap();

        assert!(queue.try_pop().unwrap().is_none());
        assert_eq!(queue.dead_letter_count().unwrap(), 1);
        let dead = queue.list_dead_letters().unwrap();
        assert_eq!(dead[0].attempts, 1);
    }

    #[test]
    fn test_recover_stalled_requeues_orphaned_delivery() {
        let (queue, _tmp) = setup();
        queue.push(&Event::new("x".into(), json!(null))).unwrap();

        let delivery = queue.try_pop().unwrap().unwrap();
        assert!(delivery.popped_at.is_some());
        drop(delivery);

        // Orphaned: not pending, not dead-lettered, invisible to consumers
        assert!(queue.try_pop().unwrap().is_none());
        assert_eq!(queue.pending_count().unwrap(), 0);
        assert_eq!(queue.dead_letter_count().unwrap(), 0);

        assert_eq!(queue.recover_stalled(0).unwrap(), 1);
        let redelivered = queue.try_pop().unwrap().unwrap();
        assert_eq!(redelivered.attempts, 1);
        let event: Event = serde_json::from_str(&redelivered.body).unwrap();
        assert_eq!(event.event_type, "x");
    }

    #[test]
    fn test_recover_stalled_skips_fresh_and_acked() {
        let (queue, _tmp) = setup();
        queue.push(&Event::new("x".into(), json!(null))).unwrap();

        let delivery = queue.try_pop().unwrap().unwrap();
        // Still within the stall window
        assert_eq!(queue.recover_stalled(3600).unwrap(), 0);

        queue.ack(&delivery.receipt).unwrap();
        assert_eq!(queue.recover_stalled(0).unwrap(), 0);
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let (queue, _tmp) = setup();
        let queue = Arc::new(queue);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await.unwrap() })
        };
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        queue.push(&Event::new("late".into(), json!(null))).unwrap();
        let delivery = consumer.await.unwrap();
        let event: Event = serde_json::from_str(&delivery.body).unwrap();
        assert_eq!(event.event_type, "late");
    }
}
