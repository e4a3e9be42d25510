//! Session-binding allocator.
//!
//! Per ROM the allocator tracks `Free` ↔ `Bound(session)`; per session
//! `Unbound` ↔ `Owns(fingerprint)`. Both directions are updated together in
//! every transition, so `Resource::owning_session` and `Session::owned` never
//! disagree.
//!
//! # Selection Policy
//!
//! `select` prefers the default ROM when it is free or already the caller's,
//! then falls back to the first ROM in rank order that is free or the
//! caller's. Ties always resolve by ascending rank.

use std::collections::HashMap;

use bytes::Bytes;

use crate::catalog::{Catalog, Resource, ResourceInfo};
use crate::error::AllocError;
use crate::fingerprint::Fingerprint;
use crate::session::{Session, SessionId};

// ============================================================================
// Outcomes
// ============================================================================

/// What `bind_by_fingerprint` did for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryGrant {
    /// The ROM was free and is now bound to the caller.
    Granted,
    /// The caller already held the ROM; nothing changed.
    AlreadyOwned,
    /// Another session holds the ROM. The caller is neither granted nor queued.
    HeldByOther(SessionId),
}

/// Result of a bind-by-fingerprint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    pub resource: ResourceInfo,
    /// Owner before the request was applied.
    pub previous_owner: Option<SessionId>,
    pub grant: QueryGrant,
}

impl QueryOutcome {
    /// True if this request moved the ROM from `Free` to the caller.
    pub fn newly_bound(&self) -> bool {
        self.grant == QueryGrant::Granted
    }
}

/// Accepted snapshot write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReceipt {
    pub fingerprint: Fingerprint,
    pub version: u64,
}

/// Dirty snapshot waiting for a durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub fingerprint: Fingerprint,
    pub snapshot: Bytes,
    pub version: u64,
}

// ============================================================================
// Allocator
// ============================================================================

/// The only mutation surface over the catalog and the session table.
#[derive(Debug)]
pub struct Allocator {
    catalog: Catalog,
    sessions: HashMap<SessionId, Session>,
}

impl Allocator {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            sessions: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Register a session on its first event. Returns true if it was unseen.
    pub fn touch(&mut self, session: &SessionId) -> bool {
        if self.sessions.contains_key(session) {
            return false;
        }
        self.sessions
            .insert(session.clone(), Session::new(session.clone()));
        true
    }

    pub fn is_live(&self, session: &SessionId) -> bool {
        self.sessions.contains_key(session)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn owner_of(&self, fingerprint: &Fingerprint) -> Option<&SessionId> {
        self.catalog.find(fingerprint)?.owning_session()
    }

    pub fn owned_by(&self, session: &SessionId) -> Option<&Fingerprint> {
        self.sessions.get(session)?.owned.as_ref()
    }

    /// Resolve a fingerprint or fail with `ResourceNotFound`.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<&Resource, AllocError> {
        self.catalog
            .find(fingerprint)
            .ok_or_else(|| AllocError::ResourceNotFound(fingerprint.clone()))
    }

    fn lookup_mut(&mut self, fingerprint: &Fingerprint) -> Result<&mut Resource, AllocError> {
        self.catalog
            .find_mut(fingerprint)
            .ok_or_else(|| AllocError::ResourceNotFound(fingerprint.clone()))
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Pick a ROM for `session` under the selection policy and bind it.
    ///
    /// A ROM the session held before is released if a different one is
    /// selected.
    pub fn select(&mut self, session: &SessionId) -> Result<ResourceInfo, AllocError> {
        self.touch(session);

        let chosen = self
            .catalog
            .default_resource()
            .filter(|r| r.is_available_to(session))
            .or_else(|| {
                self.catalog
                    .resources()
                    .iter()
                    .find(|r| r.is_available_to(session))
            })
            .map(Resource::info)
            .ok_or(AllocError::NoResourceAvailable)?;

        self.bind(session, &chosen.fingerprint);
        Ok(chosen)
    }

    /// Bind `session` to a ROM it names explicitly.
    ///
    /// A ROM held by another session is reported, not taken.
    pub fn bind_by_fingerprint(
        &mut self,
        session: &SessionId,
        fingerprint: &Fingerprint,
    ) -> Result<QueryOutcome, AllocError> {
        self.touch(session);

        let resource = self.lookup(fingerprint)?;
        let info = resource.info();
        let previous_owner = resource.owning_session().cloned();

        let grant = match &previous_owner {
            None => QueryGrant::Granted,
            Some(owner) if owner == session => QueryGrant::AlreadyOwned,
            Some(owner) => QueryGrant::HeldByOther(owner.clone()),
        };

        if grant == QueryGrant::Granted {
            self.bind(session, fingerprint);
        }

        Ok(QueryOutcome {
            resource: info,
            previous_owner,
            grant,
        })
    }

    /// Free whatever `session` holds. Returns the released fingerprint.
    pub fn release(&mut self, session: &SessionId) -> Option<Fingerprint> {
        self.touch(session);
        self.unbind(session)
    }

    /// Release on connection loss and forget the session entirely.
    pub fn reclaim_on_disconnect(&mut self, session: &SessionId) -> Option<Fingerprint> {
        let released = self.unbind(session);
        self.sessions.remove(session);
        released
    }

    fn bind(&mut self, session: &SessionId, fingerprint: &Fingerprint) {
        let previous = self.owned_by(session).cloned();
        if previous.as_ref() == Some(fingerprint) {
            return;
        }
        if let Some(previous) = previous {
            self.clear_owner(&previous, session);
        }

        if let Some(resource) = self.catalog.find_mut(fingerprint) {
            resource.owning_session = Some(session.clone());
        }
        self.sessions
            .entry(session.clone())
            .or_insert_with(|| Session::new(session.clone()))
            .owned = Some(fingerprint.clone());
    }

    fn unbind(&mut self, session: &SessionId) -> Option<Fingerprint> {
        let fingerprint = self.sessions.get_mut(session)?.owned.take()?;
        self.clear_owner(&fingerprint, session);
        Some(fingerprint)
    }

    fn clear_owner(&mut self, fingerprint: &Fingerprint, session: &SessionId) {
        if let Some(resource) = self.catalog.find_mut(fingerprint)
            && resource.owning_session.as_ref() == Some(session)
        {
            resource.owning_session = None;
        }
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Accept a state snapshot from the ROM's current owner.
    ///
    /// Does not register the session; a late snapshot from a disconnected
    /// session is rejected without reviving it. An explicit `fingerprint`
    /// takes precedence over the session's binding.
    pub fn record_snapshot(
        &mut self,
        session: &SessionId,
        fingerprint: Option<&Fingerprint>,
        snapshot: Bytes,
    ) -> Result<SnapshotReceipt, AllocError> {
        let target = fingerprint.or_else(|| self.owned_by(session)).cloned();
        let not_owner = || AllocError::NotOwner {
            session: session.clone(),
            fingerprint: target.clone(),
        };

        let Some(fingerprint) = target.as_ref() else {
            return Err(not_owner());
        };
        let Some(resource) = self
            .catalog
            .find_mut(fingerprint)
            .filter(|r| r.owning_session.as_ref() == Some(session))
        else {
            return Err(not_owner());
        };

        resource.state_snapshot = Some(snapshot);
        resource.snapshot_dirty = true;
        resource.snapshot_version += 1;

        Ok(SnapshotReceipt {
            fingerprint: fingerprint.clone(),
            version: resource.snapshot_version,
        })
    }

    /// In-memory snapshot for a ROM, if one is cached.
    pub fn cached_snapshot(&self, fingerprint: &Fingerprint) -> Result<Option<Bytes>, AllocError> {
        Ok(self.lookup(fingerprint)?.state_snapshot.clone())
    }

    /// Cache a snapshot that was just loaded from durable storage.
    ///
    /// If a newer snapshot was recorded while the load was in flight, that
    /// one is kept and returned instead.
    pub fn cache_persisted_snapshot(
        &mut self,
        fingerprint: &Fingerprint,
        snapshot: Bytes,
    ) -> Result<Bytes, AllocError> {
        let resource = self.lookup_mut(fingerprint)?;
        if let Some(current) = &resource.state_snapshot {
            return Ok(current.clone());
        }
        resource.state_snapshot = Some(snapshot.clone());
        resource.snapshot_dirty = false;
        Ok(snapshot)
    }

    /// Dirty snapshots in rank order.
    pub fn pending_writes(&self) -> Vec<PendingWrite> {
        self.catalog
            .resources()
            .iter()
            .filter(|r| r.snapshot_dirty)
            .filter_map(|r| {
                Some(PendingWrite {
                    fingerprint: r.fingerprint().clone(),
                    snapshot: r.state_snapshot.clone()?,
                    version: r.snapshot_version,
                })
            })
            .collect()
    }

    /// Clear the dirty flag after a durable write of `version`.
    ///
    /// Returns false if a newer snapshot arrived since; it stays dirty.
    pub fn mark_persisted(&mut self, fingerprint: &Fingerprint, version: u64) -> bool {
        match self.catalog.find_mut(fingerprint) {
            Some(resource) if resource.snapshot_dirty && resource.snapshot_version == version => {
                resource.snapshot_dirty = false;
                true
            }
            _ => false,
        }
    }

    /// Number of resources with an unpersisted snapshot.
    pub fn dirty_count(&self) -> usize {
        self.catalog
            .resources()
            .iter()
            .filter(|r| r.snapshot_dirty)
            .count()
    }

    // ========================================================================
    // Cover Art
    // ========================================================================

    pub fn cache_cover_image(
        &mut self,
        fingerprint: &Fingerprint,
        image: Bytes,
    ) -> Result<(), AllocError> {
        self.lookup_mut(fingerprint)?.cover_image = Some(image);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::catalog::CatalogEntry;

    fn entry(basename: &str) -> CatalogEntry {
        CatalogEntry {
            fingerprint: Fingerprint::of(basename.as_bytes()),
            basename: basename.to_string(),
            display_name: basename.to_string(),
            system: "gb".to_string(),
            source: PathBuf::from(format!("{basename}.gb")),
        }
    }

    fn fp(basename: &str) -> Fingerprint {
        Fingerprint::of(basename.as_bytes())
    }

    fn sid(id: &str) -> SessionId {
        SessionId::from(id)
    }

    /// Catalog ranked [default=0, a=1, b=2].
    fn allocator() -> Allocator {
        let catalog =
            Catalog::load(vec![entry("b"), entry("default"), entry("a")], "default").unwrap();
        Allocator::new(catalog)
    }

    /// Both directions of the binding table agree.
    fn assert_consistent(alloc: &Allocator) {
        for resource in alloc.catalog().resources() {
            if let Some(owner) = resource.owning_session() {
                assert_eq!(alloc.owned_by(owner), Some(resource.fingerprint()));
            }
        }
        for (id, session) in &alloc.sessions {
            if let Some(owned) = &session.owned {
                assert_eq!(alloc.owner_of(owned), Some(id));
            }
        }
    }

    #[test]
    fn test_select_prefers_default_then_rank() {
        let mut alloc = allocator();

        assert_eq!(alloc.select(&sid("x")).unwrap().fingerprint, fp("default"));
        assert_eq!(alloc.select(&sid("y")).unwrap().fingerprint, fp("a"));
        assert_eq!(alloc.select(&sid("z")).unwrap().fingerprint, fp("b"));
        assert_eq!(
            alloc.select(&sid("w")).unwrap_err(),
            AllocError::NoResourceAvailable
        );
        assert_consistent(&alloc);
    }

    #[test]
    fn test_select_is_stable_for_owner() {
        let mut alloc = allocator();
        alloc.select(&sid("x")).unwrap();

        assert_eq!(alloc.select(&sid("x")).unwrap().fingerprint, fp("default"));
        assert_eq!(alloc.owner_of(&fp("default")), Some(&sid("x")));
        assert_consistent(&alloc);
    }

    #[test]
    fn test_select_moves_session_to_default_when_freed() {
        let mut alloc = allocator();
        alloc.select(&sid("x")).unwrap();
        alloc.select(&sid("y")).unwrap();
        alloc.release(&sid("x"));

        // y owned `a`; selecting again lands on the now free default and frees `a`.
        assert_eq!(alloc.select(&sid("y")).unwrap().fingerprint, fp("default"));
        assert_eq!(alloc.owner_of(&fp("a")), None);
        assert_consistent(&alloc);
    }

    #[test]
    fn test_bind_by_fingerprint_symmetry() {
        let mut alloc = allocator();

        let outcome = alloc.bind_by_fingerprint(&sid("x"), &fp("b")).unwrap();
        assert_eq!(outcome.grant, QueryGrant::Granted);
        assert!(outcome.newly_bound());
        assert_eq!(outcome.previous_owner, None);
        assert_eq!(alloc.owner_of(&fp("b")), Some(&sid("x")));
        assert_eq!(alloc.owned_by(&sid("x")), Some(&fp("b")));

        alloc.release(&sid("x"));
        assert_eq!(alloc.owner_of(&fp("b")), None);
        assert_eq!(alloc.owned_by(&sid("x")), None);
        assert_consistent(&alloc);
    }

    #[test]
    fn test_bind_by_fingerprint_already_owned_is_noop() {
        let mut alloc = allocator();
        alloc.bind_by_fingerprint(&sid("x"), &fp("a")).unwrap();

        let outcome = alloc.bind_by_fingerprint(&sid("x"), &fp("a")).unwrap();
        assert_eq!(outcome.grant, QueryGrant::AlreadyOwned);
        assert_eq!(outcome.previous_owner, Some(sid("x")));
        assert!(!outcome.newly_bound());
        assert_consistent(&alloc);
    }

    #[test]
    fn test_bind_by_fingerprint_held_by_other_is_not_granted() {
        let mut alloc = allocator();
        alloc.bind_by_fingerprint(&sid("x"), &fp("a")).unwrap();

        let outcome = alloc.bind_by_fingerprint(&sid("y"), &fp("a")).unwrap();
        assert_eq!(outcome.grant, QueryGrant::HeldByOther(sid("x")));
        assert_eq!(outcome.previous_owner, Some(sid("x")));
        assert_eq!(alloc.owner_of(&fp("a")), Some(&sid("x")));
        assert_eq!(alloc.owned_by(&sid("y")), None);
        assert_consistent(&alloc);
    }

    #[test]
    fn test_bind_by_unknown_fingerprint() {
        let mut alloc = allocator();
        let unknown = Fingerprint::from_hex("feed");

        assert_eq!(
            alloc.bind_by_fingerprint(&sid("x"), &unknown).unwrap_err(),
            AllocError::ResourceNotFound(unknown)
        );
    }

    #[test]
    fn test_rebinding_releases_previous() {
        let mut alloc = allocator();
        alloc.bind_by_fingerprint(&sid("x"), &fp("a")).unwrap();
        alloc.bind_by_fingerprint(&sid("x"), &fp("b")).unwrap();

        assert_eq!(alloc.owner_of(&fp("a")), None);
        assert_eq!(alloc.owner_of(&fp("b")), Some(&sid("x")));
        let owned: Vec<_> = alloc
            .catalog()
            .resources()
            .iter()
            .filter(|r| r.owning_session() == Some(&sid("x")))
            .collect();
        assert_eq!(owned.len(), 1);
        assert_consistent(&alloc);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut alloc = allocator();
        alloc.select(&sid("x")).unwrap();

        assert_eq!(alloc.release(&sid("x")), Some(fp("default")));
        assert_eq!(alloc.release(&sid("x")), None);
        assert_eq!(alloc.release(&sid("never-bound")), None);
        assert!(alloc.catalog().resources().iter().all(|r| r.owning_session().is_none()));
        assert_consistent(&alloc);
    }

    #[test]
    fn test_reclaim_purges_session() {
        let mut alloc = allocator();
        alloc.select(&sid("x")).unwrap();
        alloc.touch(&sid("y"));
        assert!(alloc.is_live(&sid("x")));
        assert_eq!(alloc.session_count(), 2);

        assert_eq!(alloc.reclaim_on_disconnect(&sid("x")), Some(fp("default")));
        assert!(!alloc.is_live(&sid("x")));
        assert_eq!(alloc.session_count(), 1);
        assert_eq!(alloc.owner_of(&fp("default")), None);
        assert_eq!(alloc.reclaim_on_disconnect(&sid("x")), None);

        // A reused identifier starts clean.
        assert!(alloc.touch(&sid("x")));
        assert_eq!(alloc.owned_by(&sid("x")), None);
        assert_consistent(&alloc);
    }

    #[test]
    fn test_record_snapshot_requires_ownership() {
        let mut alloc = allocator();
        alloc.select(&sid("x")).unwrap();

        let err = alloc
            .record_snapshot(&sid("y"), Some(&fp("default")), Bytes::from_static(b"evil"))
            .unwrap_err();
        assert!(matches!(err, AllocError::NotOwner { .. }));
        assert_eq!(alloc.cached_snapshot(&fp("default")).unwrap(), None);

        // Session owning nothing, no explicit fingerprint.
        let err = alloc
            .record_snapshot(&sid("y"), None, Bytes::from_static(b"evil"))
            .unwrap_err();
        assert_eq!(
            err,
            AllocError::NotOwner {
                session: sid("y"),
                fingerprint: None
            }
        );
    }

    #[test]
    fn test_record_snapshot_infers_fingerprint() {
        let mut alloc = allocator();
        alloc.select(&sid("x")).unwrap();

        let receipt = alloc
            .record_snapshot(&sid("x"), None, Bytes::from_static(b"s1"))
            .unwrap();
        assert_eq!(receipt.fingerprint, fp("default"));
        assert_eq!(receipt.version, 1);

        let resource = alloc.catalog().find(&fp("default")).unwrap();
        assert_eq!(resource.state_snapshot().map(|b| &b[..]), Some(&b"s1"[..]));
        assert!(resource.snapshot_dirty());
    }

    #[test]
    fn test_record_snapshot_explicit_fingerprint_wins() {
        let mut alloc = allocator();
        alloc.select(&sid("x")).unwrap();

        // x owns default but names `a` explicitly: rejected, not redirected.
        let err = alloc
            .record_snapshot(&sid("x"), Some(&fp("a")), Bytes::from_static(b"s1"))
            .unwrap_err();
        assert_eq!(
            err,
            AllocError::NotOwner {
                session: sid("x"),
                fingerprint: Some(fp("a"))
            }
        );
        assert_eq!(alloc.cached_snapshot(&fp("default")).unwrap(), None);
    }

    #[test]
    fn test_snapshot_after_disconnect_rejected() {
        let mut alloc = allocator();
        alloc.select(&sid("x")).unwrap();
        alloc.reclaim_on_disconnect(&sid("x"));

        assert!(
            alloc
                .record_snapshot(&sid("x"), Some(&fp("default")), Bytes::from_static(b"late"))
                .is_err()
        );
        assert_eq!(alloc.owner_of(&fp("default")), None);
        assert_eq!(alloc.cached_snapshot(&fp("default")).unwrap(), None);
        assert!(!alloc.is_live(&sid("x")));
    }

    #[test]
    fn test_mark_persisted_respects_version() {
        let mut alloc = allocator();
        alloc.select(&sid("x")).unwrap();
        alloc
            .record_snapshot(&sid("x"), None, Bytes::from_static(b"s1"))
            .unwrap();

        let pending = alloc.pending_writes();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].version, 1);

        // A newer snapshot lands while s1 is being written.
        alloc
            .record_snapshot(&sid("x"), None, Bytes::from_static(b"s2"))
            .unwrap();
        assert!(!alloc.mark_persisted(&fp("default"), 1));
        assert_eq!(alloc.dirty_count(), 1);

        assert!(alloc.mark_persisted(&fp("default"), 2));
        assert_eq!(alloc.dirty_count(), 0);
        assert!(alloc.pending_writes().is_empty());
    }

    #[test]
    fn test_cache_persisted_snapshot() {
        let mut alloc = allocator();

        let delivered = alloc
            .cache_persisted_snapshot(&fp("a"), Bytes::from_static(b"disk"))
            .unwrap();
        assert_eq!(&delivered[..], b"disk");

        let resource = alloc.catalog().find(&fp("a")).unwrap();
        assert_eq!(resource.state_snapshot().map(|b| &b[..]), Some(&b"disk"[..]));
        assert!(!resource.snapshot_dirty());
    }

    #[test]
    fn test_cache_persisted_snapshot_keeps_newer_memory() {
        let mut alloc = allocator();
        alloc.bind_by_fingerprint(&sid("x"), &fp("a")).unwrap();
        alloc
            .record_snapshot(&sid("x"), None, Bytes::from_static(b"fresh"))
            .unwrap();

        let delivered = alloc
            .cache_persisted_snapshot(&fp("a"), Bytes::from_static(b"stale"))
            .unwrap();
        assert_eq!(&delivered[..], b"fresh");
        assert!(alloc.catalog().find(&fp("a")).unwrap().snapshot_dirty());
    }

    #[test]
    fn test_cover_image_cache() {
        let mut alloc = allocator();
        alloc
            .cache_cover_image(&fp("b"), Bytes::from_static(b"jpg"))
            .unwrap();

        let resource = alloc.lookup(&fp("b")).unwrap();
        assert_eq!(resource.cover_image().map(|b| &b[..]), Some(&b"jpg"[..]));
        assert!(
            alloc
                .cache_cover_image(&Fingerprint::from_hex("x"), Bytes::new())
                .is_err()
        );
    }
}
