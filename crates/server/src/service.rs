//! The ROM store service.
//!
//! [`RomStore`] wraps the allocator in one coarse lock and adds the parts
//! that need I/O: catalog bootstrap, snapshot persistence, ROM and cover art
//! reads. The lock is only ever taken for a single allocator call and is
//! never held across an `.await`.
//!
//! Until a catalog is installed every operation fails with
//! [`ServiceError::CatalogNotReady`].

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use romstore_core::{
    AllocError, Allocator, Catalog, Fingerprint, QueryOutcome, ResourceInfo, ResourceSummary,
    SessionId, SnapshotReceipt,
};
use romstore_store::{BootstrapConfig, SnapshotStore, load_catalog, read_cover_image, read_rom};
use romstore_wire::outbound;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::persistence::{FlushReport, StatePersistence};

// ============================================================================
// Replies
// ============================================================================

/// Which source a delivery came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A saved state snapshot, from memory or durable storage.
    State,
    /// The static ROM image.
    Data,
}

impl PayloadKind {
    /// Outbound event carrying this payload.
    pub fn event(self) -> &'static str {
        match self {
            Self::State => outbound::STATE,
            Self::Data => outbound::DATA,
        }
    }
}

/// Bytes handed to a session that just bound a ROM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub resource: ResourceInfo,
    pub kind: PayloadKind,
    pub payload: Bytes,
}

/// Cover art for one ROM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub name: String,
    pub fingerprint: Fingerprint,
    pub image: Bytes,
}

/// Result of a query: ownership info, plus a delivery if the ROM was granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReply {
    pub outcome: QueryOutcome,
    pub delivery: Option<Delivery>,
}

// ============================================================================
// Service
// ============================================================================

struct Shared {
    allocator: Mutex<Option<Allocator>>,
    persistence: StatePersistence,
    rom_dir: PathBuf,
    flushes: TaskTracker,
    /// Set while a flush task is spawned but has not started collecting.
    flush_scheduled: AtomicBool,
}

/// Cheaply cloneable handle to the ROM store.
#[derive(Clone)]
pub struct RomStore {
    shared: Arc<Shared>,
}

impl RomStore {
    /// A store with no catalog yet. Cover art is looked up under `rom_dir`.
    pub fn new(store: Arc<dyn SnapshotStore>, rom_dir: impl Into<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                allocator: Mutex::new(None),
                persistence: StatePersistence::new(store),
                rom_dir: rom_dir.into(),
                flushes: TaskTracker::new(),
                flush_scheduled: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.shared.allocator.lock().is_some()
    }

    /// Make `catalog` live. Replaces any previous catalog and its sessions.
    pub fn install_catalog(&self, catalog: Catalog) {
        let count = catalog.len();
        *self.shared.allocator.lock() = Some(Allocator::new(catalog));
        info!(target: "romstore.bootstrap", resources = count, "catalog ready");
    }

    /// Build the catalog from disk and install it.
    pub async fn bootstrap(&self, config: BootstrapConfig) -> Result<(), ServiceError> {
        info!(target: "romstore.bootstrap", rom_dir = %config.rom_dir.display(), "loading catalog");
        let catalog = load_catalog(config).await?;
        self.install_catalog(catalog);
        Ok(())
    }

    /// Run `f` against the allocator under the lock.
    fn with_allocator<R>(
        &self,
        f: impl FnOnce(&mut Allocator) -> Result<R, AllocError>,
    ) -> Result<R, ServiceError> {
        let mut guard = self.shared.allocator.lock();
        let allocator = guard.as_mut().ok_or(ServiceError::CatalogNotReady)?;
        Ok(f(allocator)?)
    }

    // ========================================================================
    // Catalog Queries
    // ========================================================================

    /// The default ROM, if the catalog has one.
    pub fn default_hash(&self) -> Result<Option<ResourceInfo>, ServiceError> {
        self.with_allocator(|a| Ok(a.catalog().default_resource().map(|r| r.info())))
    }

    /// Every ROM in rank order.
    pub fn list(&self) -> Result<Vec<ResourceSummary>, ServiceError> {
        self.with_allocator(|a| Ok(a.catalog().list().collect()))
    }

    /// Cover art for a ROM, read on first use and cached on the resource.
    pub async fn image(&self, fingerprint: &Fingerprint) -> Result<Option<CoverImage>, ServiceError> {
        let (info, cached) = self.with_allocator(|a| {
            let resource = a.lookup(fingerprint)?;
            Ok((resource.info(), resource.cover_image().cloned()))
        })?;

        let image = match cached {
            Some(image) => image,
            None => {
                let Some(image) = read_cover_image(&self.shared.rom_dir, &info.basename).await?
                else {
                    warn!(
                        target: "romstore.dispatch",
                        fingerprint = %fingerprint,
                        basename = %info.basename,
                        "no cover art"
                    );
                    return Ok(None);
                };
                self.with_allocator(|a| a.cache_cover_image(fingerprint, image.clone()))?;
                image
            }
        };

        Ok(Some(CoverImage {
            name: info.name,
            fingerprint: info.fingerprint,
            image,
        }))
    }

    /// Holder of a ROM, if bound.
    pub fn owner_of(&self, fingerprint: &Fingerprint) -> Result<Option<SessionId>, ServiceError> {
        self.with_allocator(|a| {
            a.lookup(fingerprint)?;
            Ok(a.owner_of(fingerprint).cloned())
        })
    }

    /// Number of snapshots not yet written to durable storage.
    pub fn dirty_count(&self) -> Result<usize, ServiceError> {
        self.with_allocator(|a| Ok(a.dirty_count()))
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Bind a ROM by fingerprint. A granted ROM comes with its delivery.
    pub async fn query(
        &self,
        session: &SessionId,
        fingerprint: &Fingerprint,
    ) -> Result<QueryReply, ServiceError> {
        let outcome = self.with_allocator(|a| a.bind_by_fingerprint(session, fingerprint))?;

        let delivery = if outcome.newly_bound() {
            info!(
                target: "romstore.alloc",
                session = %session,
                fingerprint = %fingerprint,
                "ROM bound by query"
            );
            Some(self.deliver(&outcome.resource).await?)
        } else {
            debug!(
                target: "romstore.alloc",
                session = %session,
                fingerprint = %fingerprint,
                grant = ?outcome.grant,
                "query answered without binding"
            );
            None
        };

        Ok(QueryReply { outcome, delivery })
    }

    /// Select a ROM for the session under the selection policy and deliver it.
    pub async fn request(&self, session: &SessionId) -> Result<Delivery, ServiceError> {
        let resource = self.with_allocator(|a| a.select(session))?;
        info!(
            target: "romstore.alloc",
            session = %session,
            fingerprint = %resource.fingerprint,
            rank = resource.rank,
            "ROM selected"
        );
        self.deliver(&resource).await
    }

    /// Release whatever the session holds.
    ///
    /// `expected` is what the client believes it holds; a mismatch is logged
    /// but the actual binding is released regardless.
    pub fn free(
        &self,
        session: &SessionId,
        expected: Option<&Fingerprint>,
    ) -> Result<Option<Fingerprint>, ServiceError> {
        let released = self.with_allocator(|a| Ok(a.release(session)))?;

        if let Some(expected) = expected
            && released.as_ref() != Some(expected)
        {
            warn!(
                target: "romstore.alloc",
                session = %session,
                expected = %expected,
                released = ?released.as_ref().map(Fingerprint::as_str),
                "free named a ROM the session did not hold"
            );
        }
        if let Some(fp) = &released {
            info!(target: "romstore.alloc", session = %session, fingerprint = %fp, "ROM released");
        }
        Ok(released)
    }

    /// Reclaim the session's ROM after its connection closed.
    pub fn disconnect(&self, session: &SessionId) -> Result<Option<Fingerprint>, ServiceError> {
        let released = self.with_allocator(|a| Ok(a.reclaim_on_disconnect(session)))?;
        match &released {
            Some(fp) => info!(
                target: "romstore.alloc",
                session = %session,
                fingerprint = %fp,
                "ROM reclaimed on disconnect"
            ),
            None => debug!(target: "romstore.alloc", session = %session, "session disconnected"),
        }
        Ok(released)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Accept a snapshot from the ROM's owner and schedule a flush.
    ///
    /// Flushes coalesce: while one is scheduled and not yet started, further
    /// snapshots ride along with it.
    pub fn record_state(
        &self,
        session: &SessionId,
        fingerprint: Option<&Fingerprint>,
        snapshot: Bytes,
    ) -> Result<SnapshotReceipt, ServiceError> {
        let bytes = snapshot.len();
        let receipt = self.with_allocator(|a| a.record_snapshot(session, fingerprint, snapshot))?;
        debug!(
            target: "romstore.alloc",
            session = %session,
            fingerprint = %receipt.fingerprint,
            version = receipt.version,
            bytes,
            "snapshot recorded"
        );

        self.schedule_flush();
        Ok(receipt)
    }

    fn schedule_flush(&self) {
        if self.shared.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        self.shared.flushes.spawn(async move {
            // Cleared before the flush collects, so later snapshots schedule
            // their own.
            this.shared.flush_scheduled.store(false, Ordering::Release);
            this.flush_dirty().await;
        });
    }

    /// Bytes a newly bound session should receive for a ROM.
    pub async fn current_delivery(&self, fingerprint: &Fingerprint) -> Result<Delivery, ServiceError> {
        let resource = self.with_allocator(|a| Ok(a.lookup(fingerprint)?.info()))?;
        self.deliver(&resource).await
    }

    /// In-memory snapshot, then durable snapshot, then the static ROM.
    async fn deliver(&self, resource: &ResourceInfo) -> Result<Delivery, ServiceError> {
        let fingerprint = &resource.fingerprint;
        let state = |payload| Delivery {
            resource: resource.clone(),
            kind: PayloadKind::State,
            payload,
        };

        if let Some(snapshot) = self.with_allocator(|a| a.cached_snapshot(fingerprint))? {
            return Ok(state(snapshot));
        }

        match self.shared.persistence.load(fingerprint).await {
            Ok(Some(snapshot)) => {
                let snapshot =
                    self.with_allocator(|a| a.cache_persisted_snapshot(fingerprint, snapshot))?;
                return Ok(state(snapshot));
            }
            Ok(None) => {}
            Err(err) => error!(
                target: "romstore.persist",
                fingerprint = %fingerprint,
                error = %err,
                "snapshot load failed, delivering ROM image"
            ),
        }

        let payload = read_rom(&resource.source).await?;
        Ok(Delivery {
            resource: resource.clone(),
            kind: PayloadKind::Data,
            payload,
        })
    }

    /// Write every dirty snapshot to durable storage.
    pub async fn flush_dirty(&self) -> FlushReport {
        let report = self
            .shared
            .persistence
            .flush_dirty(&self.shared.allocator)
            .await;
        if report != FlushReport::default() {
            debug!(
                target: "romstore.persist",
                written = report.written,
                superseded = report.superseded,
                failed = report.failed,
                "flush finished"
            );
        }
        report
    }

    /// Wait for in-flight flushes, then run a final flush, all within `timeout`.
    ///
    /// Returns `None` if the deadline passed first.
    pub async fn shutdown(&self, timeout: Duration) -> Option<FlushReport> {
        self.shared.flushes.close();
        let drain = async {
            self.shared.flushes.wait().await;
            self.flush_dirty().await
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(report) => {
                info!(
                    target: "romstore.persist",
                    written = report.written,
                    failed = report.failed,
                    "final flush complete"
                );
                Some(report)
            }
            Err(_) => {
                let dirty = self.dirty_count().unwrap_or(0);
                warn!(
                    target: "romstore.persist",
                    timeout_secs = timeout.as_secs_f64(),
                    dirty,
                    "final flush timed out"
                );
                None
            }
        }
    }
}
