//! ROM catalog.
//!
//! The catalog is built once from bootstrap entries and never grows or
//! shrinks afterwards. Only the runtime fields of each [`Resource`] (owner,
//! cached snapshot, dirty flag, cover art) change, and only through the
//! [`Allocator`](crate::Allocator).
//!
//! # Ranking
//!
//! - The entry whose basename equals the configured default name gets rank 0.
//! - All others are sorted by basename and ranked 1, 2, 3, ...
//! - Ties on basename break by system tag, then by source path.
//! - Resources are stored in rank order, so iteration order is listing order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::CatalogError;
use crate::fingerprint::Fingerprint;
use crate::session::SessionId;

// ============================================================================
// Entities
// ============================================================================

/// Raw entry produced by catalog bootstrap, before ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub fingerprint: Fingerprint,
    /// File name without extension.
    pub basename: String,
    /// Display name from the metadata document, or the basename.
    pub display_name: String,
    /// Platform tag, i.e. the file extension without the dot (`gb`, `gbc`, ...).
    pub system: String,
    /// Location of the immutable image bytes.
    pub source: PathBuf,
}

/// One ROM image in the catalog.
#[derive(Debug, Clone)]
pub struct Resource {
    fingerprint: Fingerprint,
    display_name: String,
    basename: String,
    system: String,
    source: PathBuf,
    rank: u32,
    is_default: bool,

    pub(crate) owning_session: Option<SessionId>,
    pub(crate) state_snapshot: Option<Bytes>,
    /// True while `state_snapshot` has not been durably written.
    pub(crate) snapshot_dirty: bool,
    /// Bumped on every accepted snapshot.
    pub(crate) snapshot_version: u64,
    pub(crate) cover_image: Option<Bytes>,
}

impl Resource {
    fn from_entry(entry: CatalogEntry, rank: u32, is_default: bool) -> Self {
        Self {
            fingerprint: entry.fingerprint,
            display_name: entry.display_name,
            basename: entry.basename,
            system: entry.system,
            source: entry.source,
            rank,
            is_default,
            owning_session: None,
            state_snapshot: None,
            snapshot_dirty: false,
            snapshot_version: 0,
            cover_image: None,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn owning_session(&self) -> Option<&SessionId> {
        self.owning_session.as_ref()
    }

    pub fn state_snapshot(&self) -> Option<&Bytes> {
        self.state_snapshot.as_ref()
    }

    pub fn snapshot_dirty(&self) -> bool {
        self.snapshot_dirty
    }

    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    pub fn cover_image(&self) -> Option<&Bytes> {
        self.cover_image.as_ref()
    }

    /// True if `session` may take this ROM: it is free or already theirs.
    pub fn is_available_to(&self, session: &SessionId) -> bool {
        self.owning_session
            .as_ref()
            .is_none_or(|owner| owner == session)
    }

    /// Owned copy of the identity fields, safe to hold after the lock drops.
    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            fingerprint: self.fingerprint.clone(),
            name: self.display_name.clone(),
            basename: self.basename.clone(),
            system: self.system.clone(),
            source: self.source.clone(),
            rank: self.rank,
            is_default: self.is_default,
        }
    }

    pub fn summary(&self) -> ResourceSummary {
        ResourceSummary {
            rank: self.rank,
            name: self.display_name.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Immutable identity of a ROM, detached from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub fingerprint: Fingerprint,
    pub name: String,
    pub basename: String,
    pub system: String,
    pub source: PathBuf,
    pub rank: u32,
    pub is_default: bool,
}

/// Listing row: what a `list` reply carries per ROM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    pub rank: u32,
    pub name: String,
    pub fingerprint: Fingerprint,
}

// ============================================================================
// Catalog
// ============================================================================

/// Ranked, fingerprint-indexed set of ROMs.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Resources in rank order.
    resources: Vec<Resource>,
    /// Fingerprint → position in `resources`.
    index: HashMap<Fingerprint, usize>,
    /// Sources dropped because their bytes duplicated an earlier entry.
    collapsed: Vec<PathBuf>,
}

impl Catalog {
    /// Build the catalog from bootstrap entries.
    ///
    /// # Errors
    /// [`CatalogError::Empty`] if `entries` is empty.
    pub fn load(mut entries: Vec<CatalogEntry>, default_name: &str) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }

        entries.sort_by(|a, b| {
            (&a.basename, &a.system, &a.source).cmp(&(&b.basename, &b.system, &b.source))
        });

        // Pull the default to the front; the rest keep basename order.
        let default_entry = entries
            .iter()
            .position(|e| e.basename == default_name)
            .map(|pos| entries.remove(pos));

        let mut resources = Vec::with_capacity(entries.len() + 1);
        let mut index = HashMap::with_capacity(entries.len() + 1);
        let mut collapsed = Vec::new();

        if let Some(entry) = default_entry {
            index.insert(entry.fingerprint.clone(), 0);
            resources.push(Resource::from_entry(entry, 0, true));
        }

        let mut next_rank = 1;
        for entry in entries {
            if index.contains_key(&entry.fingerprint) {
                collapsed.push(entry.source);
                continue;
            }
            index.insert(entry.fingerprint.clone(), resources.len());
            resources.push(Resource::from_entry(entry, next_rank, false));
            next_rank += 1;
        }

        Ok(Self {
            resources,
            index,
            collapsed,
        })
    }

    pub fn find(&self, fingerprint: &Fingerprint) -> Option<&Resource> {
        self.index.get(fingerprint).map(|&i| &self.resources[i])
    }

    pub(crate) fn find_mut(&mut self, fingerprint: &Fingerprint) -> Option<&mut Resource> {
        let i = *self.index.get(fingerprint)?;
        Some(&mut self.resources[i])
    }

    /// The resource matched by the configured default name, if any.
    pub fn default_resource(&self) -> Option<&Resource> {
        self.resources.first().filter(|r| r.is_default)
    }

    /// Listing rows in rank order.
    pub fn list(&self) -> impl Iterator<Item = ResourceSummary> + '_ {
        self.resources.iter().map(Resource::summary)
    }

    /// All resources in rank order.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Source paths skipped at load because their content was already present.
    pub fn collapsed_sources(&self) -> &[PathBuf] {
        &self.collapsed
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
