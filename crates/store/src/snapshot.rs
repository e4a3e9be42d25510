//! Durable snapshot records.
//!
//! One record per fingerprint holding the latest snapshot bytes. No history:
//! every save replaces the previous record.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use romstore_core::Fingerprint;
use tracing::debug;

use crate::error::StoreError;

/// Durable storage for state snapshots, keyed by ROM fingerprint.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest persisted snapshot, or `None` if the ROM was never saved.
    async fn load(&self, fingerprint: &Fingerprint) -> Result<Option<Bytes>, StoreError>;

    /// Replace the persisted snapshot for a ROM.
    async fn save(&self, fingerprint: &Fingerprint, snapshot: &Bytes) -> Result<(), StoreError>;
}

/// Filesystem store: `<dir>/<fingerprint>.state`.
///
/// Saves go through a sibling temp file and a rename, so a reader never sees
/// a torn record.
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the record for a fingerprint.
    pub fn record_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}.state"))
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn load(&self, fingerprint: &Fingerprint) -> Result<Option<Bytes>, StoreError> {
        let path = self.record_path(fingerprint);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    async fn save(&self, fingerprint: &Fingerprint, snapshot: &Bytes) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;

        let path = self.record_path(fingerprint);
        let tmp = path.with_extension("state.tmp");

        tokio::fs::write(&tmp, snapshot)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        debug!(
            target: "romstore.persist",
            fingerprint = %fingerprint,
            bytes = snapshot.len(),
            "snapshot record written"
        );
        Ok(())
    }
}
