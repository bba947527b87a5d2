use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use relay_media::{MediaSink, PumpError};
use relay_protocol::{PeerId, ServerMessage};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample as RtcSample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::rtp_transceiver_init::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::SignalingError;

const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// One peer's media-plane endpoint: the negotiated `RTCPeerConnection`
/// plus the send-only video and audio tracks bound to it.
///
/// Implements [`MediaSink`] so the media pump can write samples straight
/// onto the tracks without this crate's caller needing to know webrtc-rs
/// types at all.
pub struct Peer {
    peer_id: PeerId,
    pc: Arc<RTCPeerConnection>,
    video_track: Arc<TrackLocalStaticSample>,
    audio_track: Arc<TrackLocalStaticSample>,
    state_rx: watch::Receiver<RTCPeerConnectionState>,
}

impl Peer {
    pub(crate) async fn new(
        api: Arc<API>,
        peer_id: PeerId,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Result<Self, SignalingError> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![STUN_SERVER.to_owned()],
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);

        let video_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
            "video".to_owned(),
            format!("relay-{peer_id}"),
        ));

        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            format!("relay-{peer_id}"),
        ));

        let sendonly = || {
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Sendonly,
                send_encodings: vec![],
            })
        };
        pc.add_transceiver_from_track(video_track.clone() as Arc<dyn TrackLocal + Send + Sync>, sendonly())
            .await?;
        pc.add_transceiver_from_track(audio_track.clone() as Arc<dyn TrackLocal + Send + Sync>, sendonly())
            .await?;

        let (state_tx, state_rx) = watch::channel(RTCPeerConnectionState::New);

        let ice_peer_id = peer_id.clone();
        let ice_outbound = outbound.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let peer_id = ice_peer_id.clone();
            let outbound = ice_outbound.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let candidate = serde_json::to_value(init).unwrap_or(serde_json::Value::Null);
                        let _ = outbound.send(ServerMessage::WebrtcIceCandidate {
                            candidate,
                            from: peer_id.to_string(),
                        });
                    }
                    Err(err) => warn!(%peer_id, error = %err, "failed to serialize local ICE candidate"),
                }
            })
        }));

        let state_peer_id = peer_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let peer_id = state_peer_id.clone();
            let outbound = outbound.clone();
            let _ = state_tx.send(state);
            info!(%peer_id, ?state, "peer connection state changed");
            Box::pin(async move {
                match state {
                    RTCPeerConnectionState::Connected => {
                        let _ = outbound.send(ServerMessage::Status {
                            message: "WebRTC connection established".to_owned(),
                        });
                    }
                    RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed
                    | RTCPeerConnectionState::Disconnected => {
                        let _ = outbound.send(ServerMessage::Error {
                            message: format!("WebRTC connection {state}"),
                        });
                    }
                    _ => {}
                }
            })
        }));

        Ok(Self {
            peer_id,
            pc,
            video_track,
            audio_track,
            state_rx,
        })
    }

    /// §4.6 transition 4: sets the remote offer, answers it, and returns
    /// the answer SDP to send back to the client.
    pub async fn handle_offer(&self, offer_sdp: String) -> Result<String, SignalingError> {
        let offer = RTCSessionDescription::offer(offer_sdp)?;
        self.pc.set_remote_description(offer).await?;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;

        Ok(answer.sdp)
    }

    /// §4.6 transition 6: used when an answer is forwarded from another
    /// peer rather than produced locally by [`handle_offer`].
    pub async fn handle_answer(&self, answer_sdp: String) -> Result<(), SignalingError> {
        let answer = RTCSessionDescription::answer(answer_sdp)?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    /// §4.6 transition 5.
    pub async fn add_ice_candidate(&self, candidate: serde_json::Value) -> Result<(), SignalingError> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate)?;
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    /// Observes connection-state transitions without cloning the peer
    /// connection itself. `start_vr` does not wait on this before starting
    /// the media pump (see `DESIGN.md`'s Open Question decisions) — it's
    /// exposed for callers that want to track connection health separately.
    pub fn state_watch(&self) -> watch::Receiver<RTCPeerConnectionState> {
        self.state_rx.clone()
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Closes the underlying peer connection. Idempotent: webrtc-rs
    /// tolerates closing an already-closed connection.
    pub async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            warn!(peer_id = %self.peer_id, error = %err, "error closing peer connection");
        }
    }
}

#[async_trait]
impl MediaSink for Peer {
    async fn write_video(&self, bytes: Vec<u8>, duration_ms: u32) -> Result<(), PumpError> {
        let sample = RtcSample {
            data: Bytes::from(bytes),
            duration: Duration::from_millis(duration_ms as u64),
            ..Default::default()
        };
        match self.video_track.write_sample(&sample).await {
            Ok(()) => Ok(()),
            Err(webrtc::Error::ErrClosedPipe) => Err(PumpError::Closed),
            Err(err) => Err(PumpError::TrackWriteFailed(err.to_string())),
        }
    }

    async fn write_audio(&self, bytes: Vec<u8>, duration_ms: u32) -> Result<(), PumpError> {
        let sample = RtcSample {
            data: Bytes::from(bytes),
            duration: Duration::from_millis(duration_ms as u64),
            ..Default::default()
        };
        match self.audio_track.write_sample(&sample).await {
            Ok(()) => Ok(()),
            Err(webrtc::Error::ErrClosedPipe) => Err(PumpError::Closed),
            Err(err) => Err(PumpError::TrackWriteFailed(err.to_string())),
        }
    }
}
