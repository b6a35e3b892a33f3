use clap::Parser;
use pg_s3_backup::backup::backup_config::{load_env_file, BackupConfig};
use pg_s3_backup::backup::pipeline::BackupPipeline;
use pg_s3_backup::backup::result_error::result::Result;
use pg_s3_backup::backup::result_error::AddMsg;
use pg_s3_backup::backup::schedule::{shutdown_signal, Scheduler};
use pg_s3_backup::backup::storage::s3::S3Store;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Periodically dump a PostgreSQL database to S3 and prune old backups
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Dotenv file to load before reading the environment, defaults to ./.env when present
    #[arg(short, long)]
    env_file: Option<PathBuf>,
}

async fn run(args: Args) -> Result<usize> {
    load_env_file(args.env_file.as_deref())?;
    let config = BackupConfig::from_env()
        .add_msg("Loading configuration from environment failed")
        .map(Arc::new)?;
    info!("Effective configuration: {}", config.describe());

    let store = Arc::new(S3Store::from_config(config.storage())?);
    let pipeline = Arc::new(BackupPipeline::new(config.clone(), store));
    Scheduler::from_config(&config, pipeline)
        .run_until(shutdown_signal())
        .await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    match run(args).await {
        Ok(runs) => info!("Exiting after {runs} backup run(s)"),
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}
