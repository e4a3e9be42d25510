//! Storage and bootstrap errors.

use std::io;
use std::path::PathBuf;

use romstore_core::CatalogError;
use thiserror::Error;

/// Failure reading or writing a durable blob.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Injected by the in-memory store.
    #[error("write rejected for {0}")]
    Rejected(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure building the catalog at startup.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("cannot read ROM directory {}: {source}", path.display())]
    RomDir {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("cannot read metadata document {}: {source}", path.display())]
    MetadataIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed metadata document {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed metadata document {}: {source}", path.display())]
    MetadataXml {
        path: PathBuf,
        #[source]
        source: quick_xml::DeError,
    },

    #[error("bootstrap task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
