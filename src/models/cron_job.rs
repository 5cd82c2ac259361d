use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A persisted schedule whose only effect is to synthesize an event of
/// `event_type` when it fires. Owned independently of any flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobDefinition {
    pub job_key: String,
    pub name: String,
    pub event_type: String,
    pub cron_expr: String,
    pub timezone: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CronJobDefinition {
    pub fn new(
        job_key: String,
        name: String,
        event_type: String,
        cron_expr: String,
        timezone: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            job_key,
            name,
            event_type,
            cron_expr,
            timezone,
            enabled: true,
            meta: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Digest over the fields that decide whether a running timer must be
    /// replaced. Stable across reconcile passes for unchanged rows.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}\n{}\n{}\n{}",
            self.enabled,
            self.event_type,
            self.cron_expr,
            self.timezone.as_deref().unwrap_or("UTC")
        ));
        hex_digest(hasher)
    }

    /// tokio-cron-scheduler speaks 6-field cron (with seconds); 5-field
    /// operator input gets a zero seconds column prepended.
    pub fn scheduler_expr(&self) -> String {
        normalize_cron(&self.cron_expr)
    }
}

pub fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
