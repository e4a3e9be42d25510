//! TCP transport.
//!
//! Each connection is one session. Frames carry a 4-byte big-endian length
//! prefix followed by an encoded [`Envelope`]. Events from a connection are
//! handled strictly in arrival order by that connection's task; when the
//! connection ends for any reason a `disconnect` event is dispatched for it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use prost::Message;
use romstore_core::SessionId;
use romstore_wire::{Envelope, inbound};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::TransportError;

/// Largest accepted frame. Snapshots and ROM images both fit comfortably.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, TransportError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind { addr, source })
}

/// Frame codec shared by the server and its clients.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

fn session_for(peer: SocketAddr) -> SessionId {
    let n = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
    SessionId::new(format!("{peer}#{n}"))
}

/// Accept connections until `shutdown` fires, then wait for open
/// connections to finish their disconnect handling.
pub async fn serve(listener: TcpListener, dispatcher: Dispatcher, shutdown: CancellationToken) {
    let connections = TaskTracker::new();
    if let Ok(addr) = listener.local_addr() {
        info!(target: "romstore.transport", %addr, "listening");
    }

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(err) => {
                warn!(target: "romstore.transport", error = %err, "accept failed");
                continue;
            }
        };

        let session = session_for(peer);
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.clone();
        connections.spawn(async move {
            info!(target: "romstore.transport", session = %session, "connected");
            if let Err(err) = handle_connection(stream, &session, &dispatcher, &shutdown).await {
                warn!(target: "romstore.transport", session = %session, error = %err, "connection error");
            }
            dispatcher
                .dispatch(&session, &Envelope::bare(inbound::DISCONNECT))
                .await;
            info!(target: "romstore.transport", session = %session, "disconnected");
        });
    }

    connections.close();
    connections.wait().await;
    info!(target: "romstore.transport", "listener stopped");
}

async fn handle_connection(
    stream: TcpStream,
    session: &SessionId,
    dispatcher: &Dispatcher,
    shutdown: &CancellationToken,
) -> Result<(), TransportError> {
    let mut framed = Framed::new(stream, codec());

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = framed.next() => frame,
        };
        let Some(frame) = frame else {
            return Ok(());
        };

        let envelope = match Envelope::decode(frame?.freeze()) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "romstore.transport", session = %session, error = %err, "dropping undecodable frame");
                continue;
            }
        };

        // Disconnect is connection-level; a client cannot send it.
        if envelope.event == inbound::DISCONNECT {
            debug!(target: "romstore.transport", session = %session, "ignoring client-sent disconnect");
            continue;
        }

        for reply in dispatcher.dispatch(session, &envelope).await {
            framed.send(Bytes::from(reply.encode_to_vec())).await?;
        }
    }
}
