use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{PeerId, RoomId, ServerMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use crate::context::ServerContext;
use crate::idgen::generate_peer_id;
use crate::room::SessionHandle;
use crate::session::{DispatchOutcome, Session};

/// Drives one already-upgraded signaling connection end to end (§4.2,
/// §4.6): registers the session with the room registry, sends the
/// initial `init` record, then alternates between reading inbound
/// records and draining whatever the session's dispatch loop and its
/// peer connection's observers queued onto `outbound` — until the
/// transport closes or a `terminate` record is handled.
pub async fn handle_connection<S>(
    ctx: Arc<ServerContext>,
    ws: WebSocketStream<S>,
    peer_id: Option<String>,
    room: Option<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let peer_id = PeerId::from(
        peer_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(generate_peer_id),
    );
    let room_id = RoomId::from(
        room.filter(|s| !s.is_empty())
            .unwrap_or_else(|| ctx.config.default_room.clone()),
    );

    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let mut session = match Session::new(ctx.clone(), peer_id.clone(), room_id.clone(), outbound_tx.clone()).await {
        Ok(session) => session,
        Err(err) => {
            warn!(peer_id = %peer_id, error = %err, "failed to build session");
            return;
        }
    };

    ctx.rooms
        .add(
            room_id.clone(),
            SessionHandle {
                peer_id: peer_id.clone(),
                outbound: outbound_tx.clone(),
            },
        )
        .await;

    let _ = outbound_tx.send(ServerMessage::Init {
        rsa_public_key: BASE64.encode(ctx.identity.public_key_pem()),
        peer_id: peer_id.to_string(),
        room: room_id.to_string(),
    });

    ctx.rooms
        .broadcast(
            &room_id,
            &peer_id,
            ServerMessage::PeerJoined {
                peer_id: peer_id.to_string(),
            },
        )
        .await;

    let writer_peer_id = peer_id.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(err) => {
                    warn!(peer_id = %writer_peer_id, error = %err, "failed to serialize outbound record");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                warn!(peer_id = %peer_id, error = %err, "signaling transport error");
                break;
            }
            None => break,
        };

        let outcome = match frame {
            Message::Text(text) => session.handle_text(text.as_str()).await,
            Message::Binary(bytes) => session.handle_binary(bytes.to_vec()).await,
            Message::Close(_) => DispatchOutcome::Terminate,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => DispatchOutcome::Continue,
        };

        if outcome == DispatchOutcome::Terminate {
            break;
        }
    }

    session.terminate().await;
    drop(outbound_tx);
    let _ = writer_task.await;

    info!(peer_id = %peer_id, room = %room_id, "signaling session closed");
}
