use crate::models::CronJobDefinition;
use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

pub const CRON_JOB_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cron_jobs");

/// Persisted cron-job catalog. Rows here are the desired state the
/// reconciliation loop converges running timers towards.
pub struct CronJobStore {
    db: Arc<Database>,
}

impl CronJobStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(CRON_JOB_TABLE)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    pub fn upsert(&self, definition: &CronJobDefinition) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CRON_JOB_TABLE)?;
            table.insert(
                definition.job_key.as_str(),
                serde_json::to_vec(definition)?.as_slice(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, job_key: &str) -> Result<Option<CronJobDefinition>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CRON_JOB_TABLE)?;
        if let Some(value) = table.get(job_key)? {
            Ok(Some(serde_json::from_slice(value.value())?))
        } else {
            Ok(None)
        }
    }

    pub fn list(&self) -> Result<Vec<CronJobDefinition>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CRON_JOB_TABLE)?;
        let mut jobs = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            jobs.push(serde_json::from_slice(value.value())?);
        }
        Ok(jobs)
    }

    pub fn list_enabled(&self) -> Result<Vec<CronJobDefinition>> {
        Ok(self.list()?.into_iter().filter(|j| j.enabled).collect())
    }

    pub fn delete(&self, job_key: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CRON_JOB_TABLE)?;
            table.remove(job_key)?.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}
