pub mod catalog;
pub mod config;
pub mod cron_job;
pub mod flow;
pub mod queue;

use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

pub use catalog::CatalogStore;
pub use config::{ConfigStore, EngineConfig, NackPolicy};
pub use cron_job::CronJobStore;
pub use flow::{EditorWrite, FlowStore};
pub use queue::{Delivery, EventQueue};

/// All persistence behind one redb database.
pub struct Storage {
    db: Arc<Database>,
    pub flows: FlowStore,
    pub catalog: CatalogStore,
    pub cron_jobs: CronJobStore,
    pub events: EventQueue,
    pub config: ConfigStore,
}

impl Storage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);

        let flows = FlowStore::new(db.clone())?;
        let catalog = CatalogStore::new(db.clone())?;
        let cron_jobs = CronJobStore::new(db.clone())?;
        let events = EventQueue::new(db.clone())?;
        let config = ConfigStore::new(db.clone())?;

        Ok(Self {
            db,
            flows,
            catalog,
            cron_jobs,
            events,
            config,
        })
    }

    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
