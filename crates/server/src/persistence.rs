//! Write-back of dirty snapshots to durable storage.
//!
//! A flush collects the dirty snapshots under the allocator lock, writes them
//! with the lock released, then reacquires it to clear each dirty flag, but
//! only if the snapshot version is the one that was written. One flush runs
//! at a time; a second caller waits for the gate and then flushes whatever is
//! still dirty.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use romstore_core::{Allocator, Fingerprint};
use romstore_store::{SnapshotStore, StoreError};
use tracing::{debug, error};

/// Counts from one flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Records written and marked clean.
    pub written: usize,
    /// Records written but overtaken by a newer snapshot; still dirty.
    pub superseded: usize,
    /// Records whose write failed; still dirty.
    pub failed: usize,
}

pub struct StatePersistence {
    store: Arc<dyn SnapshotStore>,
    gate: tokio::sync::Mutex<()>,
}

impl StatePersistence {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Durable snapshot for a ROM, bypassing the allocator.
    pub async fn load(&self, fingerprint: &Fingerprint) -> Result<Option<Bytes>, StoreError> {
        self.store.load(fingerprint).await
    }

    /// Write every dirty snapshot. Failures stay dirty for the next flush.
    pub async fn flush_dirty(&self, allocator: &Mutex<Option<Allocator>>) -> FlushReport {
        let _gate = self.gate.lock().await;
        let mut report = FlushReport::default();

        let pending = match allocator.lock().as_ref() {
            Some(alloc) => alloc.pending_writes(),
            None => return report,
        };

        for write in pending {
            if let Err(err) = self.store.save(&write.fingerprint, &write.snapshot).await {
                error!(
                    target: "romstore.persist",
                    fingerprint = %write.fingerprint,
                    error = %err,
                    "snapshot write failed"
                );
                report.failed += 1;
                continue;
            }

            let cleared = allocator
                .lock()
                .as_mut()
                .is_some_and(|alloc| alloc.mark_persisted(&write.fingerprint, write.version));
            if cleared {
                report.written += 1;
            } else {
                debug!(
                    target: "romstore.persist",
                    fingerprint = %write.fingerprint,
                    version = write.version,
                    "snapshot superseded during write"
                );
                report.superseded += 1;
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use romstore_core::{Catalog, CatalogEntry, SessionId};
    use romstore_store::MemorySnapshotStore;

    use super::*;

    fn allocator() -> Mutex<Option<Allocator>> {
        let entries = ["default", "alpha"]
            .into_iter()
            .map(|name| CatalogEntry {
                fingerprint: Fingerprint::of(name.as_bytes()),
                basename: name.to_string(),
                display_name: name.to_string(),
                system: "gb".to_string(),
                source: PathBuf::from(format!("{name}.gb")),
            })
            .collect();
        let catalog = Catalog::load(entries, "default").unwrap();
        Mutex::new(Some(Allocator::new(catalog)))
    }

    #[tokio::test]
    async fn test_flush_writes_and_clears() {
        let store = Arc::new(MemorySnapshotStore::new());
        let persistence = StatePersistence::new(store.clone());
        let alloc = allocator();
        let x = SessionId::new("x");

        let fp = {
            let mut guard = alloc.lock();
            let a = guard.as_mut().unwrap();
            let fp = a.select(&x).unwrap().fingerprint;
            a.record_snapshot(&x, None, Bytes::from_static(b"B1")).unwrap();
            fp
        };

        let report = persistence.flush_dirty(&alloc).await;
        assert_eq!(report.written, 1);
        assert_eq!(store.get(&fp).as_deref(), Some(&b"B1"[..]));
        assert_eq!(alloc.lock().as_ref().unwrap().dirty_count(), 0);

        // Nothing left to write.
        assert_eq!(persistence.flush_dirty(&alloc).await, FlushReport::default());
    }

    #[tokio::test]
    async fn test_failed_write_stays_dirty() {
        let store = Arc::new(MemorySnapshotStore::new());
        let persistence = StatePersistence::new(store.clone());
        let alloc = allocator();
        let x = SessionId::new("x");

        {
            let mut guard = alloc.lock();
            let a = guard.as_mut().unwrap();
            a.select(&x).unwrap();
            a.record_snapshot(&x, None, Bytes::from_static(b"B1")).unwrap();
        }

        store.set_fail_writes(true);
        let report = persistence.flush_dirty(&alloc).await;
        assert_eq!(report.failed, 1);
        assert_eq!(alloc.lock().as_ref().unwrap().dirty_count(), 1);

        store.set_fail_writes(false);
        let report = persistence.flush_dirty(&alloc).await;
        assert_eq!(report.written, 1);
        assert_eq!(alloc.lock().as_ref().unwrap().dirty_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_before_catalog() {
        let persistence = StatePersistence::new(Arc::new(MemorySnapshotStore::new()));
        let alloc = Mutex::new(None);
        assert_eq!(persistence.flush_dirty(&alloc).await, FlushReport::default());
    }
}
