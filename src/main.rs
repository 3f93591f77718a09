use anyhow::Result;
use backup_restorer::config;
use backup_restorer::db;
use backup_restorer::engine;
use backup_restorer::gateway::StoreClient;
use backup_restorer::orchestrator::{Orchestrator, WorkflowSettings};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Steps claimed per worker tick
    #[arg(long, default_value_t = 16)]
    batch: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(StoreClient::from_config(&cfg)?);
    let settings = WorkflowSettings::from_config(&cfg)?;
    let orch = Orchestrator::new(store.clone(), store, settings);

    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    info!(workflow = %cfg.workflow.name, "starting restore worker");
    let worker = async {
        loop {
            match engine::process_due_steps(&pool, &orch, Utc::now(), args.batch).await {
                Ok(processed) => {
                    if processed == 0 {
                        tokio::time::sleep(poll_sleep).await;
                    }
                }
                Err(err) => {
                    error!(?err, "restore worker error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    };

    tokio::select! {
        _ = worker => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutting down");
        }
    }
    pool.close().await;
    Ok(())
}
