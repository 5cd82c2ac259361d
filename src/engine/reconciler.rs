use crate::models::{CronJobDefinition, Event};
use crate::storage::Storage;
use anyhow::{Result, anyhow};
use chrono_tz::Tz;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};
use uuid::Uuid;

/// In-memory handle for one live timer. Never persisted; lifetime is bound
/// to the reconciler that created it.
struct RunningJob {
    fingerprint: String,
    job_id: Uuid,
}

/// Keeps the set of live scheduled timers converged with the enabled rows of
/// the cron-job catalog, so catalog edits take effect without a restart.
///
/// The job map is owned exclusively by this struct and passes are serialized
/// (one loop task awaits each reconcile before the next tick), so handle
/// creation and cancellation for a job key can never race.
pub struct CronReconciler {
    scheduler: JobScheduler,
    storage: Arc<Storage>,
    jobs: HashMap<String, RunningJob>,
    interval: Duration,
}

impl CronReconciler {
    pub async fn new(storage: Arc<Storage>, interval: Duration) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("failed to create job scheduler: {}", e))?;
        scheduler
            .start()
            .await
            .map_err(|e| anyhow!("failed to start job scheduler: {}", e))?;

        Ok(Self {
            scheduler,
            storage,
            jobs: HashMap::new(),
            interval,
        })
    }

    /// One reconcile pass: diff desired state (enabled catalog rows) against
    /// actual state (running timers) and converge.
    ///
    /// Unchanged jobs are left strictly alone so their firing cadence is
    /// preserved across passes.
    pub async fn reconcile(&mut self) -> Result<()> {
        let desired = self.storage.cron_jobs.list_enabled()?;

        let mut seen: HashSet<String> = HashSet::new();
        for def in &desired {
            seen.insert(def.job_key.clone());
            let fingerprint = def.fingerprint();
            match self.jobs.get(&def.job_key) {
                Some(running) if running.fingerprint == fingerprint => {
                    debug!(job_key = %def.job_key, "job unchanged");
                }
                Some(_) => {
                    info!(job_key = %def.job_key, "job definition changed, replacing timer");
                    self.stop_job(&def.job_key).await?;
                    self.start_job(def).await?;
                }
                None => {
                    self.start_job(def).await?;
                }
            }
        }

        let stale: Vec<String> = self
            .jobs
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for job_key in stale {
            info!(job_key = %job_key, "job disabled or deleted, stopping timer");
            self.stop_job(&job_key).await?;
        }

        debug!(running = self.jobs.len(), "reconcile pass complete");
        Ok(())
    }

    async fn start_job(&mut self, def: &CronJobDefinition) -> Result<()> {
        let tz_name = def.timezone.clone().unwrap_or_else(|| "UTC".to_string());
        let tz = Tz::from_str(&tz_name)
            .map_err(|e| anyhow!("invalid timezone {} for job {}: {}", tz_name, def.job_key, e))?;

        let storage = self.storage.clone();
        let job_key = def.job_key.clone();
        let event_type = def.event_type.clone();
        let cron_expr = def.cron_expr.clone();

        let job = Job::new_async_tz(def.scheduler_expr().as_str(), tz, move |_uuid, _lock| {
            let storage = storage.clone();
            let job_key = job_key.clone();
            let event_type = event_type.clone();
            let cron_expr = cron_expr.clone();
            let tz_name = tz_name.clone();

            Box::pin(async move {
                let payload = json!({
                    "job_key": job_key,
                    "fired_at": chrono::Utc::now().to_rfc3339(),
                    "cron_expr": cron_expr,
                    "timezone": tz_name,
                });
                let event = Event::new(event_type.clone(), payload);
                match storage.events.push(&event) {
                    Ok(_) => {
                        info!(job_key = %job_key, event_type = %event_type, "cron job fired, event queued");
                    }
                    Err(e) => {
                        error!(job_key = %job_key, error = ?e, "failed to queue cron-fired event");
                    }
                }
            })
        })
        .map_err(|e| anyhow!("failed to create timer for job {}: {}", def.job_key, e))?;

        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("failed to schedule job {}: {}", def.job_key, e))?;

        info!(job_key = %def.job_key, cron = %def.cron_expr, %job_id, "cron timer started");
        self.jobs.insert(
            def.job_key.clone(),
            RunningJob {
                fingerprint: def.fingerprint(),
                job_id,
            },
        );
        Ok(())
    }

    /// Cancel a running timer. An execution already in flight is not
    /// interrupted; it runs to completion or failure.
    async fn stop_job(&mut self, job_key: &str) -> Result<bool> {
        if let Some(running) = self.jobs.remove(job_key) {
            self.scheduler
                .remove(&running.job_id)
                .await
                .map_err(|e| anyhow!("failed to remove timer for job {}: {}", job_key, e))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn running_count(&self) -> usize {
        self.jobs.len()
    }

    /// Reconcile forever on a fixed cadence. Consumes the reconciler so the
    /// job map stays owned by this single loop.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.reconcile().await {
                error!(error = ?e, "reconcile pass failed");
            }
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| anyhow!("failed to shut down job scheduler: {}", e))?;
        info!("cron reconciler shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> (CronReconciler, Arc<Storage>, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("test.db")).unwrap());
        let reconciler = CronReconciler::new(storage.clone(), Duration::from_secs(30))
            .await
            .unwrap();
        (reconciler, storage, temp_dir)
    }

    fn hourly_job(job_key: &str) -> CronJobDefinition {
        CronJobDefinition::new(
            job_key.into(),
            job_key.into(),
            "report.due".into(),
            "0 0 * * * *".into(),
            None,
        )
    }

    #[tokio::test]
    async fn test_reconcile_starts_enabled_jobs() {
        let (mut reconciler, storage, _tmp) = setup().await;
        storage.cron_jobs.upsert(&hourly_job("a")).unwrap();
        storage.cron_jobs.upsert(&hourly_job("b")).unwrap();
        let mut disabled = hourly_job("c");
        disabled.enabled = false;
        storage.cron_jobs.upsert(&disabled).unwrap();

        reconciler.reconcile().await.unwrap();
        assert_eq!(reconciler.running_count(), 2);
        assert!(reconciler.jobs.contains_key("a"));
        assert!(!reconciler.jobs.contains_key("c"));

        reconciler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_job_keeps_same_handle_across_passes() {
        let (mut reconciler, storage, _tmp) = setup().await;
        storage.cron_jobs.upsert(&hourly_job("stable")).unwrap();

        reconciler.reconcile().await.unwrap();
        let first_id = reconciler.jobs["stable"].job_id;

        reconciler.reconcile().await.unwrap();
        let second_id = reconciler.jobs["stable"].job_id;

        // Stability: an untouched definition must not have its timer recreated
        assert_eq!(first_id, second_id);

        reconciler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabling_job_removes_handle_on_next_pass() {
        let (mut reconciler, storage, _tmp) = setup().await;
        let mut job = hourly_job("toggler");
        storage.cron_jobs.upsert(&job).unwrap();

        reconciler.reconcile().await.unwrap();
        assert_eq!(reconciler.running_count(), 1);

        job.enabled = false;
        storage.cron_jobs.upsert(&job).unwrap();
        reconciler.reconcile().await.unwrap();
        assert_eq!(reconciler.running_count(), 0);

        reconciler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cron_change_replaces_handle_with_new_fingerprint() {
        let (mut reconciler, storage, _tmp) = setup().await;
        let mut job = hourly_job("editable");
        storage.cron_jobs.upsert(&job).unwrap();

        reconciler.reconcile().await.unwrap();
        let before = reconciler.jobs["editable"].job_id;
        let fingerprint_before = reconciler.jobs["editable"].fingerprint.clone();

        job.cron_expr = "0 30 * * * *".into();
        storage.cron_jobs.upsert(&job).unwrap();
        reconciler.reconcile().await.unwrap();

        let after = reconciler.jobs["editable"].job_id;
        let fingerprint_after = reconciler.jobs["editable"].fingerprint.clone();
        assert_ne!(before, after);
        assert_ne!(fingerprint_before, fingerprint_after);
        assert_eq!(reconciler.running_count(), 1);

        reconciler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_deleted_job_stopped_on_next_pass() {
        let (mut reconciler, storage, _tmp) = setup().await;
        storage.cron_jobs.upsert(&hourly_job("gone-soon")).unwrap();

        reconciler.reconcile().await.unwrap();
        assert_eq!(reconciler.running_count(), 1);

        storage.cron_jobs.delete("gone-soon").unwrap();
        reconciler.reconcile().await.unwrap();
        assert_eq!(reconciler.running_count(), 0);

        reconciler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fired_job_queues_synthetic_event() {
        let (mut reconciler, storage, _tmp) = setup().await;
        // Every second, so the test observes a fire quickly
        let mut job = hourly_job("chatty");
        job.cron_expr = "* * * * * *".into();
        storage.cron_jobs.upsert(&job).unwrap();

        reconciler.reconcile().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;

        let delivery = storage.events.try_pop().unwrap().expect("a fire was queued");
        let event: Event = serde_json::from_str(&delivery.body).unwrap();
        assert_eq!(event.event_type, "report.due");
        assert_eq!(event.payload["job_key"], "chatty");
        assert_eq!(event.payload["cron_expr"], "* * * * * *");

        reconciler.shutdown().await.unwrap();
    }
}
