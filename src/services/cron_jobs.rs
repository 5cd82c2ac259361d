use crate::AppCore;
use crate::error::EngineError;
use crate::models::CronJobDefinition;
use crate::models::cron_job::normalize_cron;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use tokio_cron_scheduler::Job;
use tracing::info;

/// Validate a cron expression and timezone at write time, so the reconciler
/// never meets an unschedulable row. A throwaway scheduler job exercises the
/// exact parser the runtime uses.
fn validate_schedule(cron_expr: &str, timezone: Option<&str>) -> Result<(), EngineError> {
    let tz_name = timezone.unwrap_or("UTC");
    let tz = Tz::from_str(tz_name)
        .map_err(|e| EngineError::InvalidCron(format!("unknown timezone '{tz_name}': {e}")))?;

    let normalized = normalize_cron(cron_expr);
    Job::new_async_tz(normalized.as_str(), tz, |_uuid, _lock| Box::pin(async {}))
        .map_err(|e| EngineError::InvalidCron(format!("'{cron_expr}': {e}")))?;
    Ok(())
}

pub async fn list_cron_jobs(core: &AppCore) -> Result<Vec<CronJobDefinition>, EngineError> {
    Ok(core.storage.cron_jobs.list()?)
}

#[derive(Debug, Deserialize)]
pub struct UpsertCronJobRequest {
    pub job_key: String,
    pub name: String,
    pub event_type: String,
    pub cron_expr: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// Create or replace a catalog row. The running timer converges on the next
/// reconcile pass; nothing is scheduled here.
pub async fn upsert_cron_job(
    core: &AppCore,
    req: UpsertCronJobRequest,
) -> Result<CronJobDefinition, EngineError> {
    if req.job_key.trim().is_empty() {
        return Err(EngineError::Validation("job key is required".into()));
    }
    if req.event_type.trim().is_empty() {
        return Err(EngineError::Validation("event type is required".into()));
    }
    validate_schedule(&req.cron_expr, req.timezone.as_deref())?;

    let mut definition = match core.storage.cron_jobs.get(&req.job_key)? {
        Some(existing) => {
            let mut updated = existing;
            updated.name = req.name;
            updated.event_type = req.event_type;
            updated.cron_expr = req.cron_expr;
            updated.timezone = req.timezone;
            updated.meta = req.meta;
            updated
        }
        None => {
            let mut definition = CronJobDefinition::new(
                req.job_key,
                req.name,
                req.event_type,
                req.cron_expr,
                req.timezone,
            );
            definition.meta = req.meta;
            definition
        }
    };
    definition.enabled = req.enabled;
    definition.updated_at = chrono::Utc::now().timestamp();

    core.storage.cron_jobs.upsert(&definition)?;
    info!(job_key = %definition.job_key, enabled = definition.enabled, "cron job upserted");
    Ok(definition)
}

#[derive(Debug, Default, Deserialize)]
pub struct CronJobPatch {
    pub name: Option<String>,
    pub event_type: Option<String>,
    pub cron_expr: Option<String>,
    /// Double option: absent = untouched, null = clear back to UTC
    pub timezone: Option<Option<String>>,
    pub enabled: Option<bool>,
    pub meta: Option<Map<String, Value>>,
}

pub async fn update_cron_job(
    core: &AppCore,
    job_key: &str,
    patch: CronJobPatch,
) -> Result<CronJobDefinition, EngineError> {
    let mut definition = core
        .storage
        .cron_jobs
        .get(job_key)?
        .ok_or_else(|| EngineError::NotFound(format!("cron job {job_key}")))?;

    if let Some(name) = patch.name {
        definition.name = name;
    }
    if let Some(event_type) = patch.event_type {
        if event_type.trim().is_empty() {
            return Err(EngineError::Validation("event type cannot be blank".into()));
        }
        definition.event_type = event_type;
    }
    if let Some(cron_expr) = patch.cron_expr {
        definition.cron_expr = cron_expr;
    }
    if let Some(timezone) = patch.timezone {
        definition.timezone = timezone;
    }
    if let Some(enabled) = patch.enabled {
        definition.enabled = enabled;
    }
    if let Some(meta) = patch.meta {
        definition.meta = meta;
    }
    validate_schedule(&definition.cron_expr, definition.timezone.as_deref())?;
    definition.updated_at = chrono::Utc::now().timestamp();

    core.storage.cron_jobs.upsert(&definition)?;
    info!(job_key, "cron job updated");
    Ok(definition)
}

pub async fn delete_cron_job(core: &AppCore, job_key: &str) -> Result<(), EngineError> {
    if !core.storage.cron_jobs.delete(job_key)? {
        return Err(EngineError::NotFound(format!("cron job {job_key}")));
    }
    info!(job_key, "cron job deleted");
    Ok(())
}
