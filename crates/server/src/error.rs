//! Server error types.

use std::io;
use std::net::SocketAddr;

use romstore_core::AllocError;
use romstore_store::{BootstrapError, StoreError};
use thiserror::Error;

/// Failure of a service operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Events arrived before the catalog finished loading.
    #[error("catalog is not ready")]
    CatalogNotReady,

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

/// Failure translating an inbound event.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown event {0:?}")]
    UnknownEvent(String),

    #[error("{0} event requires a fingerprint payload")]
    MissingFingerprint(&'static str),

    #[error("malformed {event} payload: {source}")]
    BadPayload {
        event: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Failure of the TCP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connection I/O: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] prost::DecodeError),
}
