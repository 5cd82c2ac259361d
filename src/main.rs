use anyhow::Result;
use flowline::AppCore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path = std::env::var("FLOWLINE_DB").unwrap_or_else(|_| "flowline.db".to_string());
    info!(db_path = %db_path, "starting flowline");

    let core = AppCore::new(&db_path)?;
    core.start_ingestion();
    core.start_reconciler().await?;
    core.start_due_poller();
    core.start_stall_recovery();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    Ok(())
}
