//! romstore Core
//!
//! This crate contains the in-memory model of the ROM store: the catalog of
//! content-addressed ROM images and the allocator that leases them to client
//! sessions.
//!
//! # Architecture Constraints
//!
//! The core MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Spawn tasks or block on locks
//!
//! Durable snapshot storage, catalog bootstrap and the transport live in
//! `romstore-store` and `romstore-server`. The server serializes every call
//! into [`Allocator`] behind a single lock, so each operation here is applied
//! atomically.
//!
//! # Invariants
//!
//! - A ROM is bound to at most one session.
//! - A session owns at most one ROM.
//! - `Resource::owning_session` and the session's owned fingerprint always
//!   agree; both are mutated only by [`Allocator`].

#![deny(unsafe_code)]

pub mod allocator;
pub mod catalog;
pub mod error;
pub mod fingerprint;
pub mod session;

pub use allocator::{Allocator, PendingWrite, QueryGrant, QueryOutcome, SnapshotReceipt};
pub use catalog::{Catalog, CatalogEntry, Resource, ResourceInfo, ResourceSummary};
pub use error::{AllocError, CatalogError};
pub use fingerprint::{ContentHasher, Fingerprint};
pub use session::{Session, SessionId};
