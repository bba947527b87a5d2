use std::collections::HashMap;
use std::sync::Arc;

use relay_protocol::{PeerId, RoomId, ServerMessage};
use tokio::sync::{mpsc, RwLock};

/// A session's outward-facing handle as seen by the room registry: enough
/// to push a record onto its outbound queue without the registry knowing
/// anything about ciphers, producers, or peer connections (§4.8, §3
/// "Room holds a non-owning reference to each session keyed by PeerId").
#[derive(Clone)]
pub struct SessionHandle {
    pub peer_id: PeerId,
    pub outbound: mpsc::UnboundedSender<ServerMessage>,
}

type RoomMap = HashMap<RoomId, HashMap<PeerId, SessionHandle>>;

/// Maps room identifier to the set of live sessions and forwards/
/// broadcasts signaling records addressed by peer identifier (§4.8).
///
/// Backed by a single reader/writer lock: lookups taken by
/// `forward`/`broadcast` are readers, `add`/`remove` are writers, matching
/// §5's "read paths take the reader lock, mutations take the writer
/// lock."
pub struct RoomRegistry {
    rooms: RwLock<RoomMap>,
}

impl RoomRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
        })
    }

    /// Adds `session` to `room`, creating the room if this is its first
    /// member.
    pub async fn add(&self, room: RoomId, session: SessionHandle) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room).or_default().insert(session.peer_id.clone(), session);
    }

    /// Removes `peer_id` from `room`. The room entry itself is dropped
    /// once it is empty ("destroyed (optional) when empty", §4.8).
    pub async fn remove(&self, room: &RoomId, peer_id: &PeerId) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(peer_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Sends `message` to every session in `room` other than `except`.
    /// `peer_joined`/`peer_left` notifications are broadcast by the
    /// session that owns the transition, not by the registry (§4.8) — the
    /// caller decides what and when, this just fans it out.
    pub async fn broadcast(&self, room: &RoomId, except: &PeerId, message: ServerMessage) {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room) else { return };
        for (peer_id, handle) in members {
            if peer_id == except {
                continue;
            }
            // A send failure means that peer's own session is already
            // tearing down; its removal will follow shortly. Broadcasts
            // never propagate one recipient's failure to the sender (§7).
            let _ = handle.outbound.send(message.clone());
        }
    }

    /// Forwards `message` to exactly `target` within `room`. Returns
    /// `false` if `target` isn't present, which the caller reports as
    /// `ForwardTargetUnknown` (§7) without tearing anything down.
    pub async fn forward(&self, room: &RoomId, target: &PeerId, message: ServerMessage) -> bool {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room) else { return false };
        let Some(handle) = members.get(target) else { return false };
        handle.outbound.send(message).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> (SessionHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SessionHandle {
                peer_id: PeerId::from(id),
                outbound: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn forward_delivers_to_exact_target_only() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("room-a");

        let (handle_a, mut rx_a) = handle("a");
        let (handle_b, mut rx_b) = handle("b");
        registry.add(room.clone(), handle_a).await;
        registry.add(room.clone(), handle_b).await;

        let delivered = registry
            .forward(
                &room,
                &PeerId::from("b"),
                ServerMessage::Status {
                    message: "hi".into(),
                },
            )
            .await;
        assert!(delivered);

        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv().unwrap(), ServerMessage::Status { .. }));
    }

    #[tokio::test]
    async fn forward_to_unknown_target_reports_false() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("room-a");
        let (handle_a, _rx_a) = handle("a");
        registry.add(room.clone(), handle_a).await;

        let delivered = registry
            .forward(&room, &PeerId::from("ghost"), ServerMessage::StreamStarted { message: "x".into() })
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn broadcast_excludes_the_sender() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("room-a");
        let (handle_a, mut rx_a) = handle("a");
        let (handle_b, mut rx_b) = handle("b");
        registry.add(room.clone(), handle_a).await;
        registry.add(room.clone(), handle_b).await;

        registry
            .broadcast(
                &room,
                &PeerId::from("a"),
                ServerMessage::PeerLeft {
                    peer_id: "a".into(),
                },
            )
            .await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn removing_the_last_member_drops_the_room() {
        let registry = RoomRegistry::new();
        let room = RoomId::from("room-a");
        let (handle_a, _rx_a) = handle("a");
        registry.add(room.clone(), handle_a).await;

        registry.remove(&room, &PeerId::from("a")).await;

        let delivered = registry
            .forward(&room, &PeerId::from("a"), ServerMessage::StreamStopped { message: "x".into() })
            .await;
        assert!(!delivered);
    }
}
