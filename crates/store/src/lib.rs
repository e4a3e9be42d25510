//! romstore Storage
//!
//! This crate holds every piece of the ROM store that touches the
//! filesystem:
//! - `SnapshotStore`: durable, fingerprint-keyed snapshot records
//! - Catalog bootstrap: directory walk, extension filter, display names
//! - ROM image and cover art loading
//!
//! The allocator in `romstore-core` never calls into this crate; the server
//! composes the two.

#![deny(unsafe_code)]

pub mod assets;
pub mod bootstrap;
pub mod error;
pub mod memory;
pub mod snapshot;

pub use assets::{read_cover_image, read_rom};
pub use bootstrap::{
    BootstrapConfig, DEFAULT_EXTENSIONS, GAMELIST_JSON, GAMELIST_XML, load_catalog, scan,
};
pub use error::{BootstrapError, StoreError};
pub use memory::MemorySnapshotStore;
pub use snapshot::{FsSnapshotStore, SnapshotStore};
