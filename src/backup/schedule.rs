use crate::backup::backup_config::BackupConfig;
use crate::backup::pipeline::BackupPipeline;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{info, warn};

/// Triggers backup runs on startup and on a cron schedule.
///
/// Runs never overlap. The next fire time is computed once a run has
/// finished, so ticks that elapse during a long run are skipped.
pub struct Scheduler {
    pipeline: Arc<BackupPipeline>,
    run_on_startup: bool,
    cron: Option<String>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<BackupPipeline>, run_on_startup: bool, cron: Option<String>) -> Self {
        Self {
            pipeline,
            run_on_startup,
            cron,
        }
    }

    pub fn from_config(config: &BackupConfig, pipeline: Arc<BackupPipeline>) -> Self {
        Self::new(pipeline, *config.run_on_startup(), config.cron().clone())
    }

    fn next_fire(cron: &str, after: &DateTime<Utc>) -> Result<DateTime<Utc>> {
        cron_parser::parse(cron, after)
            .map_err(|e| Error::config_error(format!("Invalid cron string {cron:?}: {e:?}")))
    }

    /// Runs until `shutdown` resolves, returning the number of runs started.
    ///
    /// Without a cron expression this returns right after the startup run.
    /// A run in progress when `shutdown` resolves is cancelled: the dump is
    /// killed and the local archive removed.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<usize>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut runs = 0;
        if self.run_on_startup {
            info!("Running backup now...");
            runs += 1;
            if !self.run_or_cancel(&mut shutdown).await {
                return Ok(runs);
            }
        }

        let Some(cron) = &self.cron else {
            info!("Not scheduling cron.");
            return Ok(runs);
        };

        let mut last_fire = Utc::now();
        loop {
            let next = Self::next_fire(cron, &Utc::now().max(last_fire))?;
            info!("Next backup scheduled at {next}");
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopping scheduler after {runs} run(s)");
                    return Ok(runs);
                }
                _ = tokio::time::sleep(wait) => {}
            }
            last_fire = next;
            runs += 1;
            if !self.run_or_cancel(&mut shutdown).await {
                return Ok(runs);
            }
        }
    }

    /// Returns false when the run was cancelled by `shutdown`.
    async fn run_or_cancel<F>(&self, shutdown: &mut Pin<&mut F>) -> bool
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => {
                warn!("Shutdown requested, cancelling the backup in progress");
                false
            }
            _ = self.pipeline.try_run() => true,
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
