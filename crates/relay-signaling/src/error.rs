use thiserror::Error;

/// Errors raised while driving a peer's offer/answer/ICE exchange.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("malformed ICE candidate: {0}")]
    BadCandidate(#[from] serde_json::Error),

    #[error("no offer supplied in webrtc_offer record")]
    MissingOffer,

    #[error("no answer supplied in webrtc_answer record")]
    MissingAnswer,
}
