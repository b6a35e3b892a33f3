//! # pg_s3_backup
//!
//! Scheduled PostgreSQL backups to S3-compatible object storage.
//!
//! ## Features
//!
//! - **Dump**: `pg_dump` in tar format, streamed through gzip to a local archive
//! - **Upload**: Archive stored as `backup-<timestamp>.tar.gz` in the bucket
//! - **Retention Management**: Only the newest `KEEP_BACKUPS` backups are kept
//! - **Scheduling**: Run on startup and/or on a cron schedule, never overlapping
//! - **Notifications**: Optional e-mail when a run fails, naming the failed step
//!
//! ## Retention scope
//!
//! Only objects whose key starts with `backup-` are listed and pruned. Backups
//! stored in the bucket under any other name, including those written by
//! earlier tools with a different naming scheme, are never counted against
//! `KEEP_BACKUPS` and are never deleted: remove them by hand.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pg_s3_backup::backup::backup_config::BackupConfig;
//! use pg_s3_backup::backup::pipeline::BackupPipeline;
//! use pg_s3_backup::backup::schedule::{shutdown_signal, Scheduler};
//! use pg_s3_backup::backup::storage::s3::S3Store;
//! use std::sync::Arc;
//!
//! # async fn run() -> pg_s3_backup::backup::result_error::result::Result<()> {
//! // Load configuration from the environment
//! let config = Arc::new(BackupConfig::from_env()?);
//! let store = Arc::new(S3Store::from_config(config.storage())?);
//!
//! // Start the backup daemon
//! let pipeline = Arc::new(BackupPipeline::new(config.clone(), store));
//! Scheduler::from_config(&config, pipeline)
//!     .run_until(shutdown_signal())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backup;
