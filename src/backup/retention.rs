//! Count-based retention of remote backups.

use crate::backup::artifact::BACKUP_KEY_PREFIX;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddFunctionName;
use crate::backup::storage::{BlobStore, StoredObject};
use bon::Builder;
use function_name::named;
use futures::StreamExt;
use getset::Getters;
use itertools::{Either, Itertools};
use serde::Serialize;
use std::cmp::Ordering;
use validator::Validate;

pub const DEFAULT_KEEP_BACKUPS: usize = 5;
pub const DEFAULT_DELETE_CONCURRENCY: usize = 4;

#[derive(Clone, Debug, Serialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct RetentionConfig {
    /// Number of most recent backups to keep
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_KEEP_BACKUPS)]
    keep: usize,
    /// Upper bound of delete requests in flight
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_DELETE_CONCURRENCY)]
    delete_concurrency: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Outcome of a pruning pass, available once every delete has settled.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub listed: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<Error>,
}

impl PruneReport {
    /// Fails with every `DeleteFailure` if at least one delete failed.
    pub fn into_result(self) -> Result<Vec<String>> {
        convert_error_vec(self.failed).map(|_| self.deleted)
    }
}

/// Oldest first. Objects without a timestamp sort after every dated one, so
/// they are the last candidates for deletion. Ties break on the key.
fn oldest_first(a: &StoredObject, b: &StoredObject) -> Ordering {
    match (&a.last_modified, &b.last_modified) {
        (Some(a_dt), Some(b_dt)) => a_dt.cmp(b_dt),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.key.cmp(&b.key))
}

impl RetentionConfig {
    /// Picks the objects to delete so that only the `keep` newest remain.
    pub fn select_for_deletion(&self, objects: Vec<StoredObject>) -> Vec<StoredObject> {
        if objects.len() <= self.keep {
            return Vec::new();
        }
        let excess = objects.len() - self.keep;
        objects
            .into_iter()
            .sorted_by(oldest_first)
            .take(excess)
            .collect_vec()
    }

    /// Lists the backups in `store` and deletes those beyond the retention count.
    ///
    /// Only keys starting with `backup-` are listed. Objects under any other
    /// name are neither counted nor deleted.
    ///
    /// Deletes run concurrently, at most `delete_concurrency` at a time, and
    /// this only returns after all of them have settled. A failed delete does
    /// not stop the others; failures are collected in the report.
    #[named]
    pub async fn prune(&self, store: &dyn BlobStore) -> Result<PruneReport> {
        tracing::info!("Cleaning up old backups...");
        let objects = store
            .list(BACKUP_KEY_PREFIX)
            .await
            .map_err(Error::list_failure)
            .add_fn_name(function_path!())?;
        let listed = objects.len();

        let to_delete = self.select_for_deletion(objects);
        if to_delete.is_empty() {
            tracing::info!("No old backups to delete (found {listed}).");
            return Ok(PruneReport {
                listed,
                ..PruneReport::default()
            });
        }

        let (deleted, failed): (Vec<_>, Vec<_>) = futures::stream::iter(to_delete)
            .map(|object| async move {
                let result = store.delete(&object.key).await;
                match &result {
                    Ok(()) => tracing::info!("Deleted old backup: {}", object.key),
                    Err(e) => tracing::warn!("Failed to delete old backup {}: {e}", object.key),
                }
                (object.key, result)
            })
            .buffer_unordered(self.delete_concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .partition_map(|(key, result)| match result {
                Ok(()) => Either::Left(key),
                Err(e) => Either::Right(Error::delete_failure(key, e)),
            });

        tracing::info!(
            "Cleanup complete: {} deleted, {} failed, {} listed.",
            deleted.len(),
            failed.len(),
            listed
        );
        Ok(PruneReport {
            listed,
            deleted,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::storage::memory::MemoryBlobStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn key(i: i64) -> String {
        format!("backup-t{i}.tar.gz")
    }

    fn object(i: i64, last_modified: Option<DateTime<Utc>>) -> StoredObject {
        StoredObject {
            key: key(i),
            last_modified,
        }
    }

    fn store_with(n: i64) -> MemoryBlobStore {
        let store = MemoryBlobStore::default();
        // inserted newest first so key order and time order disagree
        for i in (1..=n).rev() {
            store.insert(&format!("backup-{:02}.tar.gz", 100 - i), Some(t(i)));
        }
        store
    }

    fn retention(keep: usize) -> RetentionConfig {
        RetentionConfig::builder().keep(keep).build()
    }

    #[test]
    fn test_select_nothing_at_or_below_threshold() {
        let objects = (1..=5).map(|i| object(i, Some(t(i)))).collect_vec();
        assert!(retention(5).select_for_deletion(objects.clone()).is_empty());
        assert!(retention(7).select_for_deletion(objects).is_empty());
        assert!(retention(5).select_for_deletion(Vec::new()).is_empty());
    }

    #[test]
    fn test_select_oldest_beyond_threshold() {
        let objects = vec![
            object(4, Some(t(4))),
            object(1, Some(t(1))),
            object(7, Some(t(7))),
            object(2, Some(t(2))),
            object(6, Some(t(6))),
            object(3, Some(t(3))),
            object(5, Some(t(5))),
        ];

        let selected = retention(5).select_for_deletion(objects);

        assert_eq!(
            selected.into_iter().map(|o| o.key).collect_vec(),
            vec![key(1), key(2)]
        );
    }

    #[test]
    fn test_undated_objects_are_deleted_last() {
        let objects = vec![
            object(1, None),
            object(2, Some(t(2))),
            object(3, Some(t(3))),
            object(4, None),
        ];

        let selected = retention(2).select_for_deletion(objects);

        assert_eq!(
            selected.into_iter().map(|o| o.key).collect_vec(),
            vec![key(2), key(3)]
        );
    }

    #[tokio::test]
    async fn test_prune_deletes_exactly_excess() {
        let store = store_with(7);

        let report = retention(5).prune(&store).await.unwrap();

        assert_eq!(report.listed, 7);
        assert_eq!(store.delete_calls(), 2);
        assert!(report.failed.is_empty());
        // t1 and t2 are the two oldest
        assert_eq!(
            report.deleted.iter().sorted().collect_vec(),
            vec!["backup-98.tar.gz", "backup-99.tar.gz"]
        );
        assert_eq!(store.keys().len(), 5);
    }

    #[tokio::test]
    async fn test_prune_is_idempotent() {
        let store = store_with(9);
        let config = retention(3);

        config.prune(&store).await.unwrap();
        assert_eq!(store.delete_calls(), 6);

        let second = config.prune(&store).await.unwrap();
        assert!(second.deleted.is_empty());
        assert_eq!(store.delete_calls(), 6);
    }

    #[tokio::test]
    async fn test_prune_below_threshold_issues_no_deletes() {
        let store = store_with(4);

        let report = retention(5).prune(&store).await.unwrap();

        assert_eq!(report.listed, 4);
        assert_eq!(store.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_prune_ignores_foreign_objects() {
        let store = store_with(2);
        store.insert("notes.txt", Some(t(0)));
        store.insert("other/backup-1.tar.gz", Some(t(0)));
        store.insert("pgdump-2023-01-01.tar.gz", Some(t(0)));

        let report = retention(1).prune(&store).await.unwrap();

        assert_eq!(report.deleted, vec!["backup-99.tar.gz".to_string()]);
        assert!(store.keys().contains(&"notes.txt".to_string()));
        assert!(store.keys().contains(&"pgdump-2023-01-01.tar.gz".to_string()));
    }

    #[tokio::test]
    async fn test_prune_continues_after_failed_delete() {
        let store = store_with(6);
        store.fail_delete_of("backup-99.tar.gz");

        let report = retention(2).prune(&store).await.unwrap();

        assert_eq!(store.delete_calls(), 4);
        assert_eq!(report.deleted.len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(&report.failed[0], Error::DeleteFailure { key, .. } if key == "backup-99.tar.gz"));

        let err = report.into_result().unwrap_err();
        assert_eq!(err.into_iter().count(), 1);
    }

    #[tokio::test]
    async fn test_prune_bounds_concurrency() {
        let store = store_with(20);
        let config = RetentionConfig::builder()
            .keep(2)
            .delete_concurrency(3)
            .build();

        let report = config.prune(&store).await.unwrap();

        assert_eq!(report.deleted.len(), 18);
        assert!(store.max_in_flight_deletes() <= 3);
    }

    #[tokio::test]
    async fn test_prune_list_failure() {
        let store = store_with(7);
        store.fail_lists();

        let err = retention(5).prune(&store).await.unwrap_err();

        assert!(matches!(err.root(), Error::ListFailure { .. }));
        assert_eq!(store.delete_calls(), 0);
    }

    #[test]
    fn test_retention_config_validation() {
        assert!(RetentionConfig::default().validate().is_ok());
        assert_eq!(*RetentionConfig::default().keep(), 5);
        assert!(retention(0).validate().is_err());
        assert!(RetentionConfig::builder()
            .delete_concurrency(0)
            .build()
            .validate()
            .is_err());
    }
}
