//! Backup archive naming and ownership of the local archive file.

use chrono::{DateTime, SecondsFormat, Utc};
use getset::Getters;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tracing::{debug, warn};

/// Every backup object key starts with this prefix.
pub static BACKUP_KEY_PREFIX: &str = "backup-";
pub static BACKUP_FILE_EXT: &str = "tar.gz";

/// A timestamped backup, named `backup-<timestamp>.tar.gz`.
///
/// The timestamp is the run's UTC time in ISO-8601 with millisecond
/// precision, with `:` and `.` replaced by `-` so the name is safe both as a
/// file name and as an object key. The remote key is the name itself.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct BackupArtifact {
    name: String,
    created_at: DateTime<Utc>,
}

impl BackupArtifact {
    pub fn at(created_at: DateTime<Utc>) -> Self {
        let timestamp = created_at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        Self {
            name: format!("{BACKUP_KEY_PREFIX}{timestamp}.{BACKUP_FILE_EXT}"),
            created_at,
        }
    }

    pub fn key(&self) -> &str {
        &self.name
    }

    pub fn local_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.name)
    }
}

/// Owns the local archive file for the duration of a run.
///
/// The file is created exclusively, so two runs can never write to the same
/// path. Unless [`LocalArchive::remove`] was called, the file is deleted when
/// the guard is dropped: on failed steps and on cancelled runs alike.
#[derive(Debug)]
pub struct LocalArchive {
    path: PathBuf,
    removed: bool,
}

impl LocalArchive {
    pub async fn create(dir: &Path, artifact: &BackupArtifact) -> std::io::Result<(Self, File)> {
        let path = artifact.local_path(dir);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        debug!("Created local archive {:?}", &path);
        Ok((
            Self {
                path,
                removed: false,
            },
            file,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file. The guard is disarmed even if deletion fails.
    pub async fn remove(mut self) -> std::io::Result<()> {
        self.removed = true;
        tokio::fs::remove_file(&self.path).await
    }
}

impl Drop for LocalArchive {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed abandoned local archive {:?}", &self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove local archive {:?}: {e}", &self.path),
        }
    }
}
