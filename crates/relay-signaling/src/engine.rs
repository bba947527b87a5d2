use std::sync::Arc;

use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};

use relay_protocol::PeerId;
use tokio::sync::mpsc;

use crate::error::SignalingError;
use crate::peer::Peer;

/// The video codec's SDP fmtp line: baseline profile, packetization mode
/// 1, asymmetric level negotiation allowed. Fixed per the wire contract
/// with the existing browser client — changing it would renegotiate
/// differently against clients that hardcode this profile.
const H264_FMTP_LINE: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

const H264_PAYLOAD_TYPE: u8 = 96;
const OPUS_PAYLOAD_TYPE: u8 = 111;

/// Process-wide WebRTC codec registry, built once at startup. Every
/// session's peer connection is created through the same `API` instance
/// so codec negotiation is consistent across the process, the same way
/// the server's RSA identity (`relay-crypto::ServerIdentity`) is built
/// once and shared.
pub struct SignalingEngine {
    api: Arc<API>,
}

impl SignalingEngine {
    pub fn new() -> Result<Self, SignalingError> {
        let mut media_engine = MediaEngine::default();

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_owned(),
                    clock_rate: 90_000,
                    channels: 0,
                    sdp_fmtp_line: H264_FMTP_LINE.to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: H264_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48_000,
                    channels: 2,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                payload_type: OPUS_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let api = APIBuilder::new().with_media_engine(media_engine).build();

        Ok(Self { api: Arc::new(api) })
    }

    /// Builds a fresh peer connection with a send-only H.264 video track
    /// and send-only Opus audio track, per §4.6 transition 1. `outbound`
    /// receives the `webrtc_ice_candidate`/`status`/`error` records the
    /// peer's observers emit so the caller can forward them to the
    /// client's signaling transport.
    pub async fn new_peer(
        &self,
        peer_id: PeerId,
        outbound: mpsc::UnboundedSender<relay_protocol::ServerMessage>,
    ) -> Result<Peer, SignalingError> {
        Peer::new(self.api.clone(), peer_id, outbound).await
    }
}
