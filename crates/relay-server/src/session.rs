use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use relay_audio::Encoder;
use relay_crypto::Cipher;
use relay_media::{run_audio_opus_pump, run_audio_passthrough_pump, run_video_pump, MediaSink};
use relay_producer::{AudioMode, Producer, ProducerError, ProducerKind};
use relay_protocol::{ClientMessage, PeerId, RoomId, ServerMessage};
use relay_signaling::Peer;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::ServerContext;
use crate::error::SessionError;
use crate::reverse::ReverseChannel;

/// §3's session lifecycle enum. A session never re-enters a prior state
/// except `Terminating` → `Closed`; that invariant is enforced by
/// `Session::terminate` only ever moving forward, never resetting a
/// later state back to an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    KeyExchanged,
    Negotiating,
    Connected,
    Streaming,
    Terminating,
    Closed,
}

/// What the caller's read loop should do after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Continue,
    Terminate,
}

/// Per-connection aggregate (§4.7): owns the channel cipher, the
/// producer handle, the media pump's cancellation, and the negotiated
/// peer. Inbound records are processed one at a time by whichever task
/// owns the `&mut Session` — the signaling transport's read loop — so
/// there is exactly one writer to every field here and no internal
/// locking is needed for the session's own state (only the `streaming`/
/// `paused` flags are under a lock, per §5, since pump tasks read them
/// concurrently with the dispatch loop writing them).
pub struct Session {
    peer_id: PeerId,
    room_id: RoomId,
    ctx: Arc<ServerContext>,
    peer: Arc<Peer>,
    cipher: Option<Cipher>,
    producer: Option<Producer>,
    pump_cancel: Option<CancellationToken>,
    streaming: Arc<RwLock<bool>>,
    paused: Arc<RwLock<bool>>,
    lifecycle: Lifecycle,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl Session {
    /// §4.6 transition 1: allocates the peer connection, its send-only
    /// tracks, and wires its observers to `outbound` before the session
    /// accepts any signaling record.
    pub async fn new(
        ctx: Arc<ServerContext>,
        peer_id: PeerId,
        room_id: RoomId,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<Self, SessionError> {
        let peer = ctx
            .signaling
            .new_peer(peer_id.clone(), outbound.clone())
            .await
            .map_err(SessionError::Signaling)?;

        Ok(Self {
            peer_id,
            room_id,
            ctx,
            peer: Arc::new(peer),
            cipher: None,
            producer: None,
            pump_cancel: None,
            streaming: Arc::new(RwLock::new(false)),
            paused: Arc::new(RwLock::new(false)),
            lifecycle: Lifecycle::Created,
            outbound,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn send(&self, msg: ServerMessage) {
        let _ = self.outbound.send(msg);
    }

    /// Entry point for a text (JSON) signaling frame (§4.2).
    pub async fn handle_text(&mut self, text: &str) -> DispatchOutcome {
        let msg = match decode_record(text.as_bytes()) {
            RecordDecode::Message(msg) => msg,
            RecordDecode::UnknownType(ty) => {
                warn!(peer_id = %self.peer_id, r#type = %ty, "unhandled signaling record type");
                return DispatchOutcome::Continue;
            }
            RecordDecode::BadFormat(err) => {
                warn!(peer_id = %self.peer_id, error = %err, "malformed signaling record");
                self.send(ServerMessage::Error {
                    message: "malformed record".into(),
                });
                return DispatchOutcome::Continue;
            }
        };
        self.run_dispatch(msg).await
    }

    /// Entry point for a binary frame: an encrypted envelope carrying the
    /// same `nonce || ciphertext+tag` layout as the text transport's
    /// `encrypted_data.data`, but raw rather than base64 (§4.2).
    pub async fn handle_binary(&mut self, bytes: Vec<u8>) -> DispatchOutcome {
        let Some(cipher) = self.cipher.as_ref() else {
            warn!(peer_id = %self.peer_id, "binary frame received before key exchange");
            return DispatchOutcome::Continue;
        };
        let plaintext = match cipher.open(&bytes) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                warn!(peer_id = %self.peer_id, "binary frame failed to authenticate");
                self.send(ServerMessage::Error {
                    message: "authentication failed".into(),
                });
                return DispatchOutcome::Continue;
            }
        };
        let msg = match decode_record(&plaintext) {
            RecordDecode::Message(msg) => msg,
            RecordDecode::UnknownType(ty) => {
                warn!(peer_id = %self.peer_id, r#type = %ty, "unhandled signaling record type");
                return DispatchOutcome::Continue;
            }
            RecordDecode::BadFormat(err) => {
                warn!(peer_id = %self.peer_id, error = %err, "malformed record inside binary frame");
                self.send(ServerMessage::Error {
                    message: "malformed record".into(),
                });
                return DispatchOutcome::Continue;
            }
        };
        self.run_dispatch(msg).await
    }

    async fn run_dispatch(&mut self, msg: ClientMessage) -> DispatchOutcome {
        match self.dispatch(msg).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(peer_id = %self.peer_id, error = %err, "record dispatch failed");
                self.send(ServerMessage::Error {
                    message: err.to_string(),
                });
                if err.is_fatal() {
                    self.terminate().await;
                    DispatchOutcome::Terminate
                } else {
                    DispatchOutcome::Continue
                }
            }
        }
    }

    /// Dispatches one decoded record, per the table in §4.7. `encrypted_data`
    /// decrypts and re-enters this same table with the plaintext record —
    /// modeled as a loop rather than recursion, since only one level of
    /// encryption is ever legitimately nested.
    async fn dispatch(&mut self, mut msg: ClientMessage) -> Result<DispatchOutcome, SessionError> {
        loop {
            match msg {
                ClientMessage::AesKeyExchange { encrypted_key } => {
                    let key = self.ctx.identity.unwrap_session_key(&encrypted_key)?;
                    self.cipher = Some(Cipher::new(*key)?);
                    self.lifecycle = Lifecycle::KeyExchanged;
                    self.send(ServerMessage::KeyExchangeComplete);
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::StartVr { data } => {
                    self.handle_start_vr(data).await?;
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::StopStream => {
                    self.handle_stop_stream().await;
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::Pause => {
                    *self.paused.write().await = true;
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::Resume => {
                    *self.paused.write().await = false;
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::Terminate => {
                    self.terminate().await;
                    return Ok(DispatchOutcome::Terminate);
                }
                ClientMessage::WebrtcOffer { offer, target } => {
                    if let Some(target) = local_target(target, &self.peer_id) {
                        let delivered = self
                            .ctx
                            .rooms
                            .forward(
                                &self.room_id,
                                &PeerId::from(target.clone()),
                                ServerMessage::WebrtcOffer {
                                    offer,
                                    from: self.peer_id.to_string(),
                                },
                            )
                            .await;
                        if !delivered {
                            return Err(SessionError::ForwardTargetUnknown(target));
                        }
                    } else {
                        let sdp = extract_sdp(&offer).ok_or(relay_signaling::SignalingError::MissingOffer)?;
                        self.lifecycle = Lifecycle::Negotiating;
                        let answer_sdp = self.peer.handle_offer(sdp).await?;
                        self.send(ServerMessage::Answer {
                            answer: serde_json::json!({"type": "answer", "sdp": answer_sdp}),
                            from: self.peer_id.to_string(),
                        });
                    }
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::WebrtcAnswer { answer, target } => {
                    if let Some(target) = local_target(target, &self.peer_id) {
                        let delivered = self
                            .ctx
                            .rooms
                            .forward(
                                &self.room_id,
                                &PeerId::from(target.clone()),
                                ServerMessage::WebrtcAnswer {
                                    answer,
                                    from: self.peer_id.to_string(),
                                },
                            )
                            .await;
                        if !delivered {
                            return Err(SessionError::ForwardTargetUnknown(target));
                        }
                    } else {
                        let sdp = extract_sdp(&answer).ok_or(relay_signaling::SignalingError::MissingAnswer)?;
                        self.peer.handle_answer(sdp).await?;
                    }
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::WebrtcIceCandidate { candidate, target } => {
                    if let Some(target) = local_target(target, &self.peer_id) {
                        let delivered = self
                            .ctx
                            .rooms
                            .forward(
                                &self.room_id,
                                &PeerId::from(target.clone()),
                                ServerMessage::WebrtcIceCandidate {
                                    candidate,
                                    from: self.peer_id.to_string(),
                                },
                            )
                            .await;
                        if !delivered {
                            return Err(SessionError::ForwardTargetUnknown(target));
                        }
                    } else {
                        self.peer.add_ice_candidate(candidate).await?;
                    }
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::Gyro { alpha, beta, gamma } => {
                    if self.cipher.is_none() {
                        return Err(SessionError::KeyExchangeRequired);
                    }
                    if let Some(producer) = self.producer.as_mut() {
                        let _ = ReverseChannel::send_gyro(producer, alpha, beta, gamma).await;
                    }
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::Hand { hands } => {
                    if self.cipher.is_none() {
                        return Err(SessionError::KeyExchangeRequired);
                    }
                    if let Some(producer) = self.producer.as_mut() {
                        let _ = ReverseChannel::send_hand(producer, &hands.payload).await;
                    }
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::EncryptedData { data } => {
                    if self.cipher.is_none() {
                        return Err(SessionError::KeyExchangeRequired);
                    }
                    let raw = BASE64.decode(&data).map_err(|_| SessionError::AuthFail)?;
                    let plaintext = self
                        .cipher
                        .as_ref()
                        .expect("checked above")
                        .open(&raw)
                        .map_err(|_| SessionError::AuthFail)?;
                    match decode_record(&plaintext) {
                        RecordDecode::Message(inner) => {
                            msg = inner;
                            continue;
                        }
                        RecordDecode::UnknownType(ty) => {
                            warn!(peer_id = %self.peer_id, r#type = %ty, "unhandled signaling record type inside encrypted envelope");
                            return Ok(DispatchOutcome::Continue);
                        }
                        RecordDecode::BadFormat(err) => return Err(err.into()),
                    }
                }
                ClientMessage::Quality { value } => {
                    info!(peer_id = %self.peer_id, value, "quality hint received");
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::ToggleVrDebugging { enabled } => {
                    info!(peer_id = %self.peer_id, enabled, "toggled VR debugging");
                    self.send(ServerMessage::VrDebuggingStatus {
                        message: format!("debugging {}", if enabled { "enabled" } else { "disabled" }),
                    });
                    return Ok(DispatchOutcome::Continue);
                }
                ClientMessage::StartHandtracking => {
                    info!(peer_id = %self.peer_id, "hand tracking requested");
                    return Ok(DispatchOutcome::Continue);
                }
            }
        }
    }

    /// §4.7 `start_vr`: ensures a producer is running for this session
    /// and starts its independent video/audio pump tasks (§4.5, §5).
    /// Calling it again while a producer is already running is a no-op
    /// beyond re-acknowledging the stream, matching the idempotent-start
    /// behavior a client retries would expect.
    async fn handle_start_vr(&mut self, data: Option<String>) -> Result<(), SessionError> {
        if self.producer.is_some() {
            self.send(ServerMessage::StreamStarted {
                message: "stream already running".into(),
            });
            return Ok(());
        }

        let path_str = data
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.ctx.config.vr_binary_path.clone());
        let path = Path::new(&path_str);
        let kind = ProducerKind::for_path(path, self.room_id.as_str(), None)
            .ok_or_else(|| ProducerError::UnrecognizedExtension(path_str.clone()))?;
        if self.ctx.config.validate_media {
            kind.validate().await?;
        }
        let is_vr = matches!(kind, ProducerKind::VrBinary { .. });
        let audio_mode = kind.audio_mode();

        let (producer, streams) = Producer::spawn(kind).await?;
        self.producer = Some(producer);

        let cancel = CancellationToken::new();
        let sink: Arc<dyn MediaSink> = self.peer.clone();

        let video_sink = sink.clone();
        let video_cancel = cancel.clone();
        let video_peer_id = self.peer_id.clone();
        tokio::spawn(async move {
            if let Err(err) = run_video_pump(streams.video, video_sink, video_cancel).await {
                warn!(peer_id = %video_peer_id, error = %err, "video pump exited with an error");
            }
        });

        let audio_peer_id = self.peer_id.clone();
        match audio_mode {
            AudioMode::None | AudioMode::Passthrough => {
                let audio_cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(err) = run_audio_passthrough_pump(streams.audio, sink, audio_cancel).await {
                        warn!(peer_id = %audio_peer_id, error = %err, "audio pump exited with an error");
                    }
                });
            }
            AudioMode::RawPcm => {
                let encoder = Encoder::new().map_err(|e| {
                    ProducerError::Spawn(std::io::Error::other(e.to_string()))
                })?;
                let audio_cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(err) = run_audio_opus_pump(streams.audio, encoder, sink, audio_cancel).await {
                        warn!(peer_id = %audio_peer_id, error = %err, "audio pump exited with an error");
                    }
                });
            }
        }

        self.pump_cancel = Some(cancel);
        *self.streaming.write().await = true;
        self.lifecycle = Lifecycle::Streaming;

        self.send(if is_vr {
            ServerMessage::VrReady {
                message: "VR stream ready".into(),
            }
        } else {
            ServerMessage::StreamStarted {
                message: "stream started".into(),
            }
        });
        Ok(())
    }

    /// §4.7 `stop_stream`: cancels the pump tasks and kills the producer.
    /// Unlike pause/resume, this tears the producer fully down — a
    /// subsequent `start_vr` respawns it rather than resuming a paused
    /// stream, since the demuxed-frame channels can't be reattached once
    /// their pump has consumed and dropped its receiver.
    async fn handle_stop_stream(&mut self) {
        if let Some(cancel) = self.pump_cancel.take() {
            cancel.cancel();
        }
        if let Some(mut producer) = self.producer.take() {
            producer.shutdown().await;
        }
        *self.streaming.write().await = false;
        self.send(ServerMessage::StreamStopped {
            message: "stream stopped".into(),
        });
    }

    /// §4.7 `terminate` / §5 cancellation: idempotent — safe to call more
    /// than once (e.g. once from an explicit `terminate` record and again
    /// when the transport subsequently closes), per the S6/idempotent-
    /// shutdown testable property.
    pub async fn terminate(&mut self) {
        if self.lifecycle == Lifecycle::Closed {
            return;
        }
        self.lifecycle = Lifecycle::Terminating;

        if let Some(cancel) = self.pump_cancel.take() {
            cancel.cancel();
        }
        *self.streaming.write().await = false;
        if let Some(mut producer) = self.producer.take() {
            producer.shutdown().await;
        }
        self.peer.close().await;

        self.ctx.rooms.remove(&self.room_id, &self.peer_id).await;
        self.ctx
            .rooms
            .broadcast(
                &self.room_id,
                &self.peer_id,
                ServerMessage::PeerLeft {
                    peer_id: self.peer_id.to_string(),
                },
            )
            .await;

        self.lifecycle = Lifecycle::Closed;
    }
}

/// The `type` tags `ClientMessage` recognizes, in wire (snake_case) form.
/// Kept as an explicit list rather than deriving it from the enum so an
/// unrecognized tag can be told apart from a recognized tag with a
/// malformed body (§4.2: unknown types are logged and ignored, not an
/// error; malformed bodies for a known type still fail).
const KNOWN_RECORD_TYPES: &[&str] = &[
    "aes_key_exchange",
    "start_vr",
    "stop_stream",
    "webrtc_offer",
    "webrtc_answer",
    "webrtc_ice_candidate",
    "gyro",
    "hand",
    "pause",
    "resume",
    "terminate",
    "quality",
    "toggle_vr_debugging",
    "start_handtracking",
    "encrypted_data",
];

enum RecordDecode {
    Message(ClientMessage),
    /// The record's `type` field isn't one this server recognizes.
    UnknownType(String),
    BadFormat(serde_json::Error),
}

/// Distinguishes an unrecognized `type` (§4.2: log and ignore, not an
/// error) from a genuinely malformed record (bad JSON, or a known type
/// with a missing/mistyped field), which still fails with `BadFormat`.
fn decode_record(bytes: &[u8]) -> RecordDecode {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(err) => return RecordDecode::BadFormat(err),
    };
    if let Some(ty) = value.get("type").and_then(|v| v.as_str()) {
        if !KNOWN_RECORD_TYPES.contains(&ty) {
            return RecordDecode::UnknownType(ty.to_string());
        }
    }
    match serde_json::from_value(value) {
        Ok(msg) => RecordDecode::Message(msg),
        Err(err) => RecordDecode::BadFormat(err),
    }
}

/// Resolves a record's optional `target` field into a forward target,
/// treating both an absent target and a target equal to the sender's own
/// id as "handle locally" (§4.6: "Signaling records carrying a target
/// field addressed to a different peer are NOT consumed locally").
fn local_target(target: Option<String>, self_id: &PeerId) -> Option<String> {
    target.filter(|t| t != self_id.as_str())
}

fn extract_sdp(value: &serde_json::Value) -> Option<String> {
    value.get("sdp").and_then(|v| v.as_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_target_treats_self_as_absent() {
        let me = PeerId::from("me");
        assert_eq!(local_target(Some("me".to_string()), &me), None);
        assert_eq!(local_target(Some("other".to_string()), &me), Some("other".to_string()));
        assert_eq!(local_target(None, &me), None);
    }

    #[test]
    fn extract_sdp_reads_the_sdp_field() {
        let value = serde_json::json!({"type": "offer", "sdp": "v=0"});
        assert_eq!(extract_sdp(&value), Some("v=0".to_string()));
        assert_eq!(extract_sdp(&serde_json::json!({})), None);
    }

    #[test]
    fn decode_record_distinguishes_unknown_type_from_malformed() {
        let unknown = serde_json::to_vec(&serde_json::json!({ "type": "not_a_real_message" })).unwrap();
        assert!(matches!(decode_record(&unknown), RecordDecode::UnknownType(ty) if ty == "not_a_real_message"));

        let bad_json = b"{not json";
        assert!(matches!(decode_record(bad_json), RecordDecode::BadFormat(_)));

        let missing_field = serde_json::to_vec(&serde_json::json!({ "type": "aes_key_exchange" })).unwrap();
        assert!(matches!(decode_record(&missing_field), RecordDecode::BadFormat(_)));

        let known = serde_json::to_vec(&serde_json::json!({ "type": "stop_stream" })).unwrap();
        assert!(matches!(decode_record(&known), RecordDecode::Message(ClientMessage::StopStream)));
    }
}
