//! Client sessions.

use std::fmt;

use crate::fingerprint::Fingerprint;

/// Opaque session identifier, supplied by the transport per connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Allocator-side bookkeeping for one live session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// ROM currently bound to this session. Mirrors `Resource::owning_session`.
    pub owned: Option<Fingerprint>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self { id, owned: None }
    }
}
