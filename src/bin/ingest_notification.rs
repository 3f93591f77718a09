use anyhow::{Context, Result};
use backup_restorer::config;
use backup_restorer::db;
use backup_restorer::engine;
use backup_restorer::gateway::StoreClient;
use backup_restorer::notification::Notification;
use backup_restorer::orchestrator::{Orchestrator, WorkflowSettings};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Start workflow instances from a backup notification JSON document"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Notification JSON file; reads stdin when omitted.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Also run the steps that are due right away.
    #[arg(long)]
    run_due: bool,
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

    let payload = match &args.file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    let notification = Notification::from_json(&payload).context("invalid notification JSON")?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(StoreClient::from_config(&cfg)?);
    let orch = Orchestrator::new(store.clone(), store, WorkflowSettings::from_config(&cfg)?);

    let admitted =
        engine::admit_notification(&pool, &orch, &cfg.workflow.name, &notification, Utc::now())
            .await?;
    for a in &admitted {
        println!("{}\t{}", a.instance_id, a.state.as_str());
    }

    if args.run_due {
        let mut steps = 0usize;
        while engine::process_next_step(&pool, &orch, Utc::now()).await? {
            steps += 1;
        }
        info!(steps, "due steps processed");
    }
    Ok(())
}
