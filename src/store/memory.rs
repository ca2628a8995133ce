use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{RecordData, SecretStore};
use crate::error::{Error, Result};

/// A server-side failure as the API server would report it.
pub(crate) fn unavailable() -> Error {
    Error::from(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "etcdserver: request timed out".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

/// In-process record store that counts payload writes.
#[derive(Default)]
pub(crate) struct MemoryStore {
    records: Mutex<BTreeMap<String, RecordData>>,
    missing_metadata: Mutex<BTreeSet<String>>,
    writes: AtomicUsize,
    /// Writes left until the armed failure, counting the failing one
    fail_in: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_writes(&self) {
        self.writes.store(0, Ordering::SeqCst);
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.records.lock().unwrap().contains_key(name)
    }

    pub(crate) fn record(&self, name: &str) -> Option<RecordData> {
        self.records.lock().unwrap().get(name).cloned()
    }

    /// Seeds a record without counting it as a write.
    pub(crate) fn insert(&self, name: &str, data: RecordData) {
        self.records.lock().unwrap().insert(name.to_string(), data);
    }

    pub(crate) fn remove(&self, name: &str) {
        self.records.lock().unwrap().remove(name);
    }

    /// Makes the `nth` upcoming payload write fail once. Skipped writes of
    /// unchanged payloads do not count.
    pub(crate) fn fail_write(&self, nth: usize) {
        *self.fail_in.lock().unwrap() = Some(nth);
    }

    pub(crate) fn strip_metadata(&self, name: &str) {
        self.missing_metadata.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<RecordData>> {
        Ok(self.record(name))
    }

    async fn upsert(&self, name: &str, data: RecordData) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        if records.get(name) == Some(&data) {
            return Ok(false);
        }
        let mut fail_in = self.fail_in.lock().unwrap();
        if let Some(left) = *fail_in {
            *fail_in = left.checked_sub(1).filter(|left| *left > 0);
            if left <= 1 {
                return Err(unavailable());
            }
        }
        records.insert(name.to_string(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn ensure_metadata(&self, name: &str) -> Result<bool> {
        Ok(self.contains(name) && self.missing_metadata.lock().unwrap().remove(name))
    }
}
