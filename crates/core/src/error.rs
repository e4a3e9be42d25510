//! Core error types.

use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::session::SessionId;

/// Catalog construction failures. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("no ROM images matched the accepted extensions")]
    Empty,
}

/// Allocator operation failures.
///
/// None of these are retried by the allocator; the server logs them and
/// replies with nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("unknown ROM fingerprint {0}")]
    ResourceNotFound(Fingerprint),

    #[error("every ROM is bound to another session")]
    NoResourceAvailable,

    /// The session tried to write state for a ROM it does not hold.
    #[error("session {session} does not own ROM {}", display_target(.fingerprint))]
    NotOwner {
        session: SessionId,
        fingerprint: Option<Fingerprint>,
    },
}

fn display_target(fingerprint: &Option<Fingerprint>) -> &str {
    fingerprint.as_ref().map_or("<none>", Fingerprint::as_str)
}
