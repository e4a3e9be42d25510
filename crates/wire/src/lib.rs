//! romstore Wire Protocol Types
//!
//! This crate defines the Protobuf message types exchanged between client
//! sessions and the ROM store. Every event, inbound or outbound, travels as an
//! [`Envelope`] naming the event and carrying its payload.
//!
//! # Payload Encoding
//!
//! - Structured payloads (`StatePacket`, `HashReply`, `RomInfo`,
//!   `ImageReply`, `QueryResponse`) are Protobuf messages.
//! - Fingerprints sent with `image`, `query` and `free` are plain UTF-8.
//! - ROM and state deliveries (`data`, `state` replies) are raw bytes.
//! - `defaulthash`, `list` and `request` carry no payload.

#![deny(unsafe_code)]

use bytes::Bytes;
use prost::Message;

// ============================================================================
// Event Names
// ============================================================================

/// Inbound event names (session → store).
pub mod inbound {
    pub const DEFAULT_HASH: &str = "defaulthash";
    pub const LIST: &str = "list";
    pub const IMAGE: &str = "image";
    pub const QUERY: &str = "query";
    pub const REQUEST: &str = "request";
    pub const STATE: &str = "state";
    pub const FREE: &str = "free";
    /// Connection-level; synthesized by the transport when a session drops.
    pub const DISCONNECT: &str = "disconnect";
}

/// Outbound event names (store → session).
pub mod outbound {
    pub const HASH: &str = "hash";
    /// Either a `RomInfo` listing row or raw ROM bytes.
    pub const DATA: &str = "data";
    pub const IMAGE: &str = "image";
    pub const RESPONSE: &str = "response";
    /// Raw state snapshot bytes.
    pub const STATE: &str = "state";
}

// ============================================================================
// Envelope
// ============================================================================

/// One named event on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(string, tag = "1")]
    pub event: String,

    #[prost(bytes = "bytes", tag = "2")]
    pub payload: Bytes,
}

impl Envelope {
    /// Envelope with a raw payload.
    pub fn new(event: &str, payload: impl Into<Bytes>) -> Self {
        Self {
            event: event.to_string(),
            payload: payload.into(),
        }
    }

    /// Envelope with no payload.
    pub fn bare(event: &str) -> Self {
        Self::new(event, Bytes::new())
    }

    /// Envelope carrying an encoded Protobuf message.
    pub fn message<M: Message>(event: &str, message: &M) -> Self {
        Self::new(event, message.encode_to_vec())
    }

    /// Payload as UTF-8 text, or `None` if empty or not valid UTF-8.
    pub fn payload_text(&self) -> Option<&str> {
        if self.payload.is_empty() {
            return None;
        }
        std::str::from_utf8(&self.payload)
            .ok()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Decode the payload as a Protobuf message.
    pub fn decode_payload<M: Message + Default>(&self) -> Result<M, prost::DecodeError> {
        M::decode(self.payload.clone())
    }
}

// ============================================================================
// Inbound Payloads
// ============================================================================

/// Payload of the `state` event: a snapshot from the owning session.
#[derive(Clone, PartialEq, Message)]
pub struct StatePacket {
    /// ROM the snapshot belongs to. Absent means "the ROM I currently own".
    #[prost(string, optional, tag = "1")]
    pub fingerprint: Option<String>,

    /// Opaque emulator save state.
    #[prost(bytes = "bytes", tag = "2")]
    pub snapshot: Bytes,
}

// ============================================================================
// Outbound Payloads
// ============================================================================

/// Payload of the `hash` reply.
///
/// Sent for `defaulthash` (with `default_rom = true`) and after a ROM is
/// bound by `query` or `request` (with `system` set).
#[derive(Clone, PartialEq, Message)]
pub struct HashReply {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(string, tag = "2")]
    pub fingerprint: String,

    #[prost(bool, tag = "3")]
    pub default_rom: bool,

    /// Platform tag (`gb`, `gbc`, `nes`).
    #[prost(string, optional, tag = "4")]
    pub system: Option<String>,
}

/// One listing row of the `list` reply (sent as a `data` event).
#[derive(Clone, PartialEq, Message)]
pub struct RomInfo {
    #[prost(uint32, tag = "1")]
    pub rank: u32,

    #[prost(string, tag = "2")]
    pub name: String,

    #[prost(string, tag = "3")]
    pub fingerprint: String,
}

/// Payload of the `image` reply: cover art for one ROM.
#[derive(Clone, PartialEq, Message)]
pub struct ImageReply {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(string, tag = "2")]
    pub fingerprint: String,

    #[prost(bytes = "bytes", tag = "3")]
    pub image: Bytes,
}

/// Payload of the `response` reply to `query`.
#[derive(Clone, PartialEq, Message)]
pub struct QueryResponse {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(string, tag = "2")]
    pub fingerprint: String,

    /// Session holding the ROM when the query arrived, if any.
    #[prost(string, optional, tag = "3")]
    pub current_owner: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
