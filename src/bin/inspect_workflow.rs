use anyhow::{bail, Result};
use backup_restorer::config;
use backup_restorer::db::{self, InstanceRecord};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Print workflow instances and their transition history")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Instance id to inspect
    #[arg(long, conflicts_with = "target")]
    id: Option<String>,

    /// Show every instance restoring into this table name
    #[arg(long)]
    target: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let instances = match (&args.id, &args.target) {
        (Some(id), _) => match db::fetch_instance(&pool, id).await? {
            Some(record) => vec![record],
            None => bail!("no workflow instance {id}"),
        },
        (None, Some(target)) => db::list_instances_for_target(&pool, target).await?,
        (None, None) => bail!("pass --id or --target"),
    };

    for record in &instances {
        print_instance(record);
        for t in db::list_transitions(&pool, &record.id).await? {
            println!(
                "  {}  {:<17} {}",
                t.recorded_at.to_rfc3339(),
                t.state.as_str(),
                t.detail.unwrap_or_default()
            );
        }
    }
    println!("live instances: {}", db::count_live_instances(&pool).await?);
    Ok(())
}

fn print_instance(record: &InstanceRecord) {
    println!("Instance: {} ({})", record.id, record.workflow_name);
    println!("  state: {}", record.state.as_str());
    if let Some(target) = &record.target_name {
        println!("  target: {target}");
    }
    if let Some(message_id) = &record.message_id {
        println!("  message: {message_id}");
    }
    if let Some(id) = &record.resolved_identifier {
        println!("  resolved: {id}");
    }
    if let Some(failure) = &record.failure {
        println!("  failure: {failure}");
    }
    println!("  updated: {}", record.updated_at.to_rfc3339());
}
