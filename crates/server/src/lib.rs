//! romstore Server
//!
//! The server hands out exclusive leases on ROM images to client sessions
//! and keeps each ROM's latest save state. It owns:
//! - The [`RomStore`] service: allocator lock, catalog readiness, snapshot
//!   persistence and delivery
//! - The [`Dispatcher`]: event name to operation table
//! - The TCP transport: framing, one session per connection
//! - Configuration and logging setup for the `romstore` binary
//!
//! # Concurrency
//!
//! All allocator transitions run under one lock that is never held across an
//! `.await`. Durable reads and writes happen outside it. Events from one
//! connection are processed in arrival order.

#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod service;
pub mod transport;

pub use config::{Cli, ServiceConfig};
pub use dispatch::{Dispatcher, EventKind};
pub use error::{DispatchError, ServiceError, TransportError};
pub use logging::init_logging;
pub use persistence::{FlushReport, StatePersistence};
pub use service::{CoverImage, Delivery, PayloadKind, QueryReply, RomStore};
