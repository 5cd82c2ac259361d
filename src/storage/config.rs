use anyhow::Result;
use redb::{Database, ReadableDatabase, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CONFIG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("engine_config");

const DEFAULT_PREFETCH: usize = 4;
const DEFAULT_RECONCILE_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_DISPATCH_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_DUE_POLL_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_STALL_TIMEOUT_SECONDS: u64 = 300;
const MIN_PREFETCH: usize = 1;
const MIN_INTERVAL_SECONDS: u64 = 1;

/// What to do with an event whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NackPolicy {
    /// Bounded default: failed events leave the hot path
    #[default]
    DeadLetter,
    Requeue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Max concurrently in-flight events per consumer
    pub prefetch: usize,
    pub reconcile_interval_seconds: u64,
    pub dispatch_timeout_seconds: u64,
    pub due_poll_interval_seconds: u64,
    /// In-flight deliveries older than this are requeued by stall recovery
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_seconds: u64,
    #[serde(default)]
    pub nack_policy: NackPolicy,
    pub smtp_host: Option<String>,
    pub smtp_from: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            reconcile_interval_seconds: DEFAULT_RECONCILE_INTERVAL_SECONDS,
            dispatch_timeout_seconds: DEFAULT_DISPATCH_TIMEOUT_SECONDS,
            due_poll_interval_seconds: DEFAULT_DUE_POLL_INTERVAL_SECONDS,
            stall_timeout_seconds: DEFAULT_STALL_TIMEOUT_SECONDS,
            nack_policy: NackPolicy::DeadLetter,
            smtp_host: None,
            smtp_from: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prefetch < MIN_PREFETCH {
            return Err(anyhow::anyhow!("prefetch must be at least {}", MIN_PREFETCH));
        }
        if self.reconcile_interval_seconds < MIN_INTERVAL_SECONDS {
            return Err(anyhow::anyhow!(
                "reconcile interval must be at least {} second(s)",
                MIN_INTERVAL_SECONDS
            ));
        }
        if self.stall_timeout_seconds < MIN_INTERVAL_SECONDS {
            return Err(anyhow::anyhow!(
                "stall timeout must be at least {} second(s)",
                MIN_INTERVAL_SECONDS
            ));
        }
        if self.dispatch_timeout_seconds < MIN_INTERVAL_SECONDS {
            return Err(anyhow::anyhow!(
                "dispatch timeout must be at least {} second(s)",
                MIN_INTERVAL_SECONDS
            ));
        }
        Ok(())
    }
}

fn default_stall_timeout() -> u64 {
    DEFAULT_STALL_TIMEOUT_SECONDS
}

pub struct ConfigStore {
    db: Arc<Database>,
}

impl ConfigStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(CONFIG_TABLE)?;
        write_txn.commit()?;

        let store = Self { db };
        if store.get()?.is_none() {
            store.update(EngineConfig::default())?;
        }
        Ok(store)
    }

    pub fn get(&self) -> Result<Option<EngineConfig>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONFIG_TABLE)?;
        if let Some(value) = table.get("engine")? {
            Ok(Some(serde_json::from_slice(value.value())?))
        } else {
            Ok(None)
        }
    }

    pub fn current(&self) -> EngineConfig {
        self.get().ok().flatten().unwrap_or_default()
    }

    pub fn update(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONFIG_TABLE)?;
            table.insert("engine", serde_json::to_vec(&config)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
