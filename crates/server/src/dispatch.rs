//! Event dispatch.
//!
//! Maps inbound event names to service operations and operation results to
//! outbound envelopes. The dispatcher holds no state of its own; everything
//! lives behind the [`RomStore`] handle.
//!
//! Failed events produce no reply. Each one is logged once: rejections at
//! `warn`, storage failures at `error`.

use romstore_core::{AllocError, Fingerprint, ResourceInfo, SessionId};
use romstore_wire::{
    Envelope, HashReply, ImageReply, QueryResponse, RomInfo, StatePacket, inbound, outbound,
};
use tracing::{error, trace, warn};

use crate::error::{DispatchError, ServiceError};
use crate::service::{Delivery, RomStore};

/// Inbound events the store understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DefaultHash,
    List,
    Image,
    Query,
    Request,
    State,
    Free,
    Disconnect,
}

const EVENT_TABLE: &[(&str, EventKind)] = &[
    (inbound::DEFAULT_HASH, EventKind::DefaultHash),
    (inbound::LIST, EventKind::List),
    (inbound::IMAGE, EventKind::Image),
    (inbound::QUERY, EventKind::Query),
    (inbound::REQUEST, EventKind::Request),
    (inbound::STATE, EventKind::State),
    (inbound::FREE, EventKind::Free),
    (inbound::DISCONNECT, EventKind::Disconnect),
];

impl EventKind {
    pub fn parse(name: &str) -> Option<Self> {
        EVENT_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, kind)| kind)
    }

    pub fn name(self) -> &'static str {
        EVENT_TABLE
            .iter()
            .find(|(_, k)| *k == self)
            .map_or("unknown", |&(n, _)| n)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    service: RomStore,
}

impl Dispatcher {
    pub fn new(service: RomStore) -> Self {
        Self { service }
    }

    /// Handle one event, logging any failure. Returns the replies to send.
    pub async fn dispatch(&self, session: &SessionId, envelope: &Envelope) -> Vec<Envelope> {
        match self.handle(session, envelope).await {
            Ok(replies) => {
                trace!(
                    target: "romstore.dispatch",
                    session = %session,
                    event = %envelope.event,
                    replies = replies.len(),
                    "event handled"
                );
                replies
            }
            Err(err) => {
                log_failure(session, &envelope.event, &err);
                Vec::new()
            }
        }
    }

    /// Handle one event, returning the failure to the caller.
    pub async fn handle(
        &self,
        session: &SessionId,
        envelope: &Envelope,
    ) -> Result<Vec<Envelope>, DispatchError> {
        let kind = EventKind::parse(&envelope.event)
            .ok_or_else(|| DispatchError::UnknownEvent(envelope.event.clone()))?;

        let replies = match kind {
            EventKind::DefaultHash => self
                .service
                .default_hash()?
                .map(|r| {
                    let reply = HashReply {
                        name: r.name,
                        fingerprint: r.fingerprint.to_string(),
                        default_rom: true,
                        system: None,
                    };
                    vec![Envelope::message(outbound::HASH, &reply)]
                })
                .unwrap_or_default(),

            EventKind::List => self
                .service
                .list()?
                .into_iter()
                .map(|row| {
                    let info = RomInfo {
                        rank: row.rank,
                        name: row.name,
                        fingerprint: row.fingerprint.to_string(),
                    };
                    Envelope::message(outbound::DATA, &info)
                })
                .collect(),

            EventKind::Image => {
                let fingerprint = required_fingerprint(kind, envelope)?;
                self.service
                    .image(&fingerprint)
                    .await?
                    .map(|cover| {
                        let reply = ImageReply {
                            name: cover.name,
                            fingerprint: cover.fingerprint.to_string(),
                            image: cover.image,
                        };
                        vec![Envelope::message(outbound::IMAGE, &reply)]
                    })
                    .unwrap_or_default()
            }

            EventKind::Query => {
                let fingerprint = required_fingerprint(kind, envelope)?;
                let reply = self.service.query(session, &fingerprint).await?;
                let response = QueryResponse {
                    name: reply.outcome.resource.name.clone(),
                    fingerprint: reply.outcome.resource.fingerprint.to_string(),
                    current_owner: reply.outcome.previous_owner.map(|s| s.to_string()),
                };

                let mut replies = vec![Envelope::message(outbound::RESPONSE, &response)];
                if let Some(delivery) = reply.delivery {
                    replies.extend(delivery_envelopes(delivery));
                }
                replies
            }

            EventKind::Request => {
                let delivery = self.service.request(session).await?;
                delivery_envelopes(delivery).to_vec()
            }

            EventKind::State => {
                let packet: StatePacket = envelope.decode_payload().map_err(|source| {
                    DispatchError::BadPayload {
                        event: kind.name(),
                        source,
                    }
                })?;
                let fingerprint = packet
                    .fingerprint
                    .filter(|f| !f.trim().is_empty())
                    .map(|f| Fingerprint::from_hex(f.trim()));
                self.service
                    .record_state(session, fingerprint.as_ref(), packet.snapshot)?;
                Vec::new()
            }

            EventKind::Free => {
                let expected = envelope.payload_text().map(Fingerprint::from);
                self.service.free(session, expected.as_ref())?;
                Vec::new()
            }

            EventKind::Disconnect => {
                self.service.disconnect(session)?;
                Vec::new()
            }
        };

        Ok(replies)
    }
}

fn required_fingerprint(kind: EventKind, envelope: &Envelope) -> Result<Fingerprint, DispatchError> {
    envelope
        .payload_text()
        .map(Fingerprint::from)
        .ok_or(DispatchError::MissingFingerprint(kind.name()))
}

/// The delivery payload followed by the `hash` announcement.
fn delivery_envelopes(delivery: Delivery) -> [Envelope; 2] {
    let hash = hash_announcement(&delivery.resource);
    [Envelope::new(delivery.kind.event(), delivery.payload), hash]
}

fn hash_announcement(resource: &ResourceInfo) -> Envelope {
    let reply = HashReply {
        name: resource.name.clone(),
        fingerprint: resource.fingerprint.to_string(),
        default_rom: false,
        system: Some(resource.system.clone()),
    };
    Envelope::message(outbound::HASH, &reply)
}

fn log_failure(session: &SessionId, event: &str, err: &DispatchError) {
    match err {
        DispatchError::Service(ServiceError::Store(_) | ServiceError::Bootstrap(_)) => error!(
            target: "romstore.dispatch",
            session = %session,
            event,
            error = %err,
            "event failed"
        ),
        DispatchError::Service(ServiceError::Alloc(AllocError::NotOwner { .. })) => warn!(
            target: "romstore.dispatch",
            session = %session,
            event,
            error = %err,
            "snapshot ignored"
        ),
        _ => warn!(
            target: "romstore.dispatch",
            session = %session,
            event,
            error = %err,
            "event rejected"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use romstore_store::{BootstrapConfig, MemorySnapshotStore};

    use super::*;

    async fn dispatcher() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.gb"), "default-rom").unwrap();
        std::fs::write(dir.path().join("alpha.gbc"), "alpha-rom").unwrap();

        let service = RomStore::new(Arc::new(MemorySnapshotStore::new()), dir.path());
        service
            .bootstrap(BootstrapConfig::new(dir.path(), "default"))
            .await
            .unwrap();
        (dir, Dispatcher::new(service))
    }

    fn fp(contents: &str) -> String {
        Fingerprint::of(contents.as_bytes()).to_string()
    }

    #[test]
    fn test_event_table() {
        for (name, kind) in EVENT_TABLE {
            assert_eq!(EventKind::parse(name), Some(*kind));
            assert_eq!(kind.name(), *name);
        }
        assert_eq!(EventKind::parse("DefaultHash"), None);
    }

    #[tokio::test]
    async fn test_defaulthash_reply() {
        let (_dir, dispatcher) = dispatcher().await;
        let replies = dispatcher
            .dispatch(&SessionId::new("x"), &Envelope::bare(inbound::DEFAULT_HASH))
            .await;

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].event, outbound::HASH);
        let hash: HashReply = replies[0].decode_payload().unwrap();
        assert!(hash.default_rom);
        assert_eq!(hash.fingerprint, fp("default-rom"));
    }

    #[tokio::test]
    async fn test_list_in_rank_order() {
        let (_dir, dispatcher) = dispatcher().await;
        let replies = dispatcher
            .dispatch(&SessionId::new("x"), &Envelope::bare(inbound::LIST))
            .await;

        let rows: Vec<RomInfo> = replies
            .iter()
            .map(|e| {
                assert_eq!(e.event, outbound::DATA);
                e.decode_payload().unwrap()
            })
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].rank, rows[0].name.as_str()), (0, "default"));
        assert_eq!((rows[1].rank, rows[1].name.as_str()), (1, "alpha"));
    }

    #[tokio::test]
    async fn test_request_delivers_rom_then_hash() {
        let (_dir, dispatcher) = dispatcher().await;
        let replies = dispatcher
            .dispatch(&SessionId::new("x"), &Envelope::bare(inbound::REQUEST))
            .await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].event, outbound::DATA);
        assert_eq!(&replies[0].payload[..], b"default-rom");
        let hash: HashReply = replies[1].decode_payload().unwrap();
        assert_eq!(hash.system.as_deref(), Some("gb"));
        assert!(!hash.default_rom);
    }

    #[tokio::test]
    async fn test_query_then_state_then_handoff() {
        let (_dir, dispatcher) = dispatcher().await;
        let (x, y) = (SessionId::new("x"), SessionId::new("y"));
        let alpha = fp("alpha-rom");

        let replies = dispatcher
            .dispatch(&x, &Envelope::new(inbound::QUERY, alpha.clone()))
            .await;
        assert_eq!(replies.len(), 3);
        let response: QueryResponse = replies[0].decode_payload().unwrap();
        assert_eq!(response.current_owner, None);
        assert_eq!(replies[1].event, outbound::DATA);

        let packet = StatePacket {
            fingerprint: None,
            snapshot: Bytes::from_static(b"save-1"),
        };
        let replies = dispatcher
            .dispatch(&x, &Envelope::message(inbound::STATE, &packet))
            .await;
        assert!(replies.is_empty());

        // Held by x: y only learns who owns it.
        let replies = dispatcher
            .dispatch(&y, &Envelope::new(inbound::QUERY, alpha.clone()))
            .await;
        assert_eq!(replies.len(), 1);
        let response: QueryResponse = replies[0].decode_payload().unwrap();
        assert_eq!(response.current_owner.as_deref(), Some("x"));

        dispatcher
            .dispatch(&x, &Envelope::new(inbound::FREE, alpha.clone()))
            .await;
        let replies = dispatcher
            .dispatch(&y, &Envelope::new(inbound::QUERY, alpha))
            .await;
        assert_eq!(replies[1].event, outbound::STATE);
        assert_eq!(&replies[1].payload[..], b"save-1");
    }

    #[tokio::test]
    async fn test_rejections_produce_no_reply() {
        let (_dir, dispatcher) = dispatcher().await;
        let x = SessionId::new("x");

        let err = dispatcher
            .handle(&x, &Envelope::bare("teleport"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownEvent(_)));

        let err = dispatcher
            .handle(&x, &Envelope::bare(inbound::QUERY))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MissingFingerprint("query")));

        let err = dispatcher
            .handle(&x, &Envelope::new(inbound::STATE, vec![0xff, 0xff, 0xff]))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::BadPayload { .. }));

        let packet = StatePacket {
            fingerprint: Some(fp("default-rom")),
            snapshot: Bytes::from_static(b"not mine"),
        };
        let replies = dispatcher
            .dispatch(&x, &Envelope::message(inbound::STATE, &packet))
            .await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_not_ready_produces_no_reply() {
        let service = RomStore::new(Arc::new(MemorySnapshotStore::new()), "unused");
        let dispatcher = Dispatcher::new(service);

        let err = dispatcher
            .handle(&SessionId::new("x"), &Envelope::bare(inbound::LIST))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Service(ServiceError::CatalogNotReady)
        ));
    }
}
