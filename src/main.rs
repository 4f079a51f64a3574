//! PlayHub reset-sweep runner
//!
//! Connects to PostgreSQL (running migrations) and resets due recurring
//! missions. Without `RESET_INTERVAL_SECS` it runs one sweep and exits, so
//! an external cron can drive it; with it, it sweeps on that interval
//! until Ctrl+C.

use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use playhub_server::logging;
use playhub_server::missions::MissionService;
use playhub_server::storage::PostgresStore;
use playhub_server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    logging::init_tracing(&config.tracing);

    info!("PlayHub progress engine starting...");

    let store = PostgresStore::new(&config.database_url, config.pg_max_connections)
        .await
        .context("PostgreSQL connection failed")?;
    info!("PostgreSQL connected and migrations applied");

    let service = MissionService::new(Arc::new(store), &config.progress);

    let Some(secs) = config.reset_interval_secs else {
        let report = service.reset_due_missions(Utc::now()).await?;
        info!(
            reset = report.reset.len(),
            failed = report.failed.len(),
            "Single sweep done"
        );
        return Ok(());
    };

    info!("Sweeping every {}s", secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = service.reset_due_missions(Utc::now()).await {
                    error!("Reset sweep failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
