//! In-memory blob store used by the pipeline and retention tests.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::storage::{BlobStore, StoredObject};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, (Option<DateTime<Utc>>, Vec<u8>)>>,
    failing_deletes: Mutex<HashSet<String>>,
    fail_put: AtomicBool,
    fail_list: AtomicBool,
    consume_source: AtomicBool,
    delete_calls: AtomicUsize,
    in_flight_deletes: AtomicUsize,
    max_in_flight_deletes: AtomicUsize,
}

fn injected(what: &str) -> Error {
    std::io::Error::new(std::io::ErrorKind::PermissionDenied, format!("{what} denied")).into()
}

impl MemoryBlobStore {
    pub fn insert(&self, key: &str, last_modified: Option<DateTime<Utc>>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (last_modified, Vec::new()));
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn content(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|(_, c)| c.clone())
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_puts(&self) {
        self.fail_put.store(true, Ordering::SeqCst);
    }

    /// Makes `put_file` delete the uploaded file, so removing it afterwards fails.
    pub fn consume_source_on_put(&self) {
        self.consume_source.store(true, Ordering::SeqCst);
    }

    pub fn fail_lists(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight_deletes(&self) -> usize {
        self.max_in_flight_deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_file(&self, path: &Path, key: &str) -> Result<()> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(injected("put"));
        }
        let content = tokio::fs::read(path).await?;
        if self.consume_source.load(Ordering::SeqCst) {
            tokio::fs::remove_file(path).await?;
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (Some(Utc::now()), content));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(injected("list"));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (last_modified, _))| StoredObject {
                key: key.clone(),
                last_modified: *last_modified,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight_deletes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight_deletes
            .fetch_max(in_flight, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight_deletes.fetch_sub(1, Ordering::SeqCst);

        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(injected("delete"));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}
