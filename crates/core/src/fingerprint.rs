//! Content fingerprints for ROM images.
//!
//! A fingerprint is the lowercase hex SHA-256 of an image's bytes. It is the
//! only identity a ROM has on the wire and in durable storage.

use std::fmt;

use sha2::{Digest, Sha256};

/// Content-derived identity of a ROM image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a complete byte blob.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(bytes);
        hasher.finish()
    }

    /// Wrap a fingerprint received from a client or read from disk.
    ///
    /// No validation is performed; an unknown fingerprint simply fails to
    /// resolve in the catalog.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(hex: &str) -> Self {
        Self::from_hex(hex)
    }
}

/// Incremental fingerprint computation, for images read in chunks.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(format!("{:x}", self.inner.finalize()))
    }
}
