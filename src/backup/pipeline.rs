//! One backup run: dump, upload, delete the local copy, prune old backups.

use crate::backup::artifact::{BackupArtifact, LocalArchive};
use crate::backup::backup_config::BackupConfig;
use crate::backup::notifications::Notification;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::storage::BlobStore;
use chrono::{DateTime, Utc};
use derive_more::Display;
use std::sync::Arc;
use tracing::{error, info, warn};

/// States of a run, in order. The local archive travels with the states
/// that need it.
#[derive(Debug, Display)]
pub enum BackupStep {
    Dumping,
    #[display("Uploading")]
    Uploading(LocalArchive),
    #[display("DeletingLocal")]
    DeletingLocal(LocalArchive),
    Pruning,
    Done,
}

#[derive(Debug)]
pub struct RunReport {
    pub key: String,
    pub archive_size: u64,
    pub pruned: Vec<String>,
}

/// A failed run: the step that failed first and the backup it was producing.
#[derive(Debug, Display)]
#[display("Backup {key} failed at {step}:\n{}", indent::indent_all_with("  ", error.to_string()))]
pub struct RunFailure {
    pub step: String,
    pub key: String,
    pub error: Error,
}

impl RunFailure {
    pub fn subject(&self) -> String {
        format!("Database backup {} failed at {}", self.key, self.step)
    }

    pub fn body(&self) -> String {
        format!(
            "Backup: {}\nFailed step: {}\n\n{}\n",
            self.key, self.step, self.error
        )
    }
}

pub struct BackupPipeline {
    config: Arc<BackupConfig>,
    store: Arc<dyn BlobStore>,
}

impl BackupPipeline {
    pub fn new(config: Arc<BackupConfig>, store: Arc<dyn BlobStore>) -> Self {
        Self { config, store }
    }

    /// Runs the backup as of `now`.
    ///
    /// A failed dump or upload ends the run; the local archive is removed on
    /// the way out. A failed local cleanup does not stop pruning, the run is
    /// reported as failed once pruning is done.
    pub async fn run(&self, now: DateTime<Utc>) -> std::result::Result<RunReport, RunFailure> {
        let artifact = BackupArtifact::at(now);
        info!("Initiating DB backup {}", artifact.name());

        let mut step = BackupStep::Dumping;
        let mut archive_size = 0;
        let mut pruned = Vec::new();
        let mut deferred = Vec::new();
        let mut failed_at: Option<String> = None;

        loop {
            info!("Backup step: {step}");
            let name = step.to_string();
            let fail = |error| RunFailure {
                step: name.clone(),
                key: artifact.key().to_string(),
                error,
            };
            step = match step {
                BackupStep::Dumping => {
                    let (archive, size) = self.dump(&artifact).await.map_err(fail)?;
                    archive_size = size;
                    BackupStep::Uploading(archive)
                }
                BackupStep::Uploading(archive) => {
                    self.upload(&archive, &artifact).await.map_err(fail)?;
                    BackupStep::DeletingLocal(archive)
                }
                BackupStep::DeletingLocal(archive) => {
                    let path = archive.path().to_path_buf();
                    info!("Deleting local archive {:?}...", &path);
                    if let Err(e) = archive.remove().await {
                        warn!("Local archive {:?} not removed, continuing with pruning", &path);
                        deferred.push(Error::cleanup_failure(path, Error::from(e)));
                        failed_at.get_or_insert_with(|| name.clone());
                    }
                    BackupStep::Pruning
                }
                BackupStep::Pruning => {
                    let result = self
                        .config
                        .retention()
                        .prune(self.store.as_ref())
                        .await
                        .and_then(|report| report.into_result());
                    match result {
                        Ok(deleted) => pruned = deleted,
                        Err(e) => {
                            deferred.push(e);
                            failed_at.get_or_insert_with(|| name.clone());
                        }
                    }
                    BackupStep::Done
                }
                BackupStep::Done => break,
            }
        }

        if let Err(error) = convert_error_vec(deferred) {
            return Err(RunFailure {
                step: failed_at.unwrap_or_default(),
                key: artifact.key().to_string(),
                error,
            });
        }
        info!("DB backup complete: {}", artifact.key());
        Ok(RunReport {
            key: artifact.key().to_string(),
            archive_size,
            pruned,
        })
    }

    async fn dump(&self, artifact: &BackupArtifact) -> Result<(LocalArchive, u64)> {
        let (archive, mut file) = LocalArchive::create(self.config.tmp_dir(), artifact)
            .await
            .map_err(|e| {
                Error::dump_failure(
                    format!(
                        "cannot create {:?}: {e}",
                        artifact.local_path(self.config.tmp_dir())
                    ),
                    "",
                )
            })?;
        let size = self
            .config
            .dump()
            .dump(self.config.database_url(), &mut file)
            .await?;
        file.sync_all()
            .await
            .map_err(|e| Error::dump_failure(format!("syncing archive failed: {e}"), ""))?;
        Ok((archive, size))
    }

    async fn upload(&self, archive: &LocalArchive, artifact: &BackupArtifact) -> Result<()> {
        info!("Uploading backup to S3...");
        self.store
            .put_file(archive.path(), artifact.key())
            .await
            .map_err(|e| Error::upload_failure(artifact.key(), e))?;
        info!("Backup uploaded to S3 as {}", artifact.key());
        Ok(())
    }

    /// Runs the backup now, logging and notifying failures instead of returning them.
    pub async fn try_run(&self) -> Option<RunReport> {
        match self.run(Utc::now()).await {
            Ok(report) => Some(report),
            Err(failure) => {
                error!("{failure}");
                self.notify_failure(&failure).await;
                None
            }
        }
    }

    async fn notify_failure(&self, failure: &RunFailure) {
        let Some(smtp) = self.config.notification() else {
            return;
        };
        if let Err(e) = smtp.send(&failure.subject(), &failure.body()).await {
            warn!("Failure notification not sent: {e}");
        }
    }
}
