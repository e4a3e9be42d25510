//! In-memory snapshot store for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use romstore_core::Fingerprint;

use crate::error::StoreError;
use crate::snapshot::SnapshotStore;

/// Snapshot store backed by a map, with write-failure injection.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    records: Mutex<HashMap<Fingerprint, Bytes>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record as if it had been persisted by an earlier run.
    pub fn insert(&self, fingerprint: Fingerprint, snapshot: Bytes) {
        self.records.lock().insert(fingerprint, snapshot);
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Bytes> {
        self.records.lock().get(fingerprint).cloned()
    }

    /// Make every subsequent `save` fail until turned off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, fingerprint: &Fingerprint) -> Result<Option<Bytes>, StoreError> {
        Ok(self.get(fingerprint))
    }

    async fn save(&self, fingerprint: &Fingerprint, snapshot: &Bytes) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(fingerprint.to_string()));
        }
        self.records
            .lock()
            .insert(fingerprint.clone(), snapshot.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
