use serde::{Deserialize, Serialize};

/// A single detected hand landmark, as emitted by the browser's hand-tracking
/// pipeline: a normalized 3D coordinate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One detected hand: handedness label, 21 landmarks, and a confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hand {
    pub handedness: String,
    pub landmarks: Vec<Landmark>,
    pub confidence: f32,
}

/// The `hands` payload carried by a `hand` client message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandTrackingPayload {
    pub payload: Vec<Hand>,
}

/// Records a client sends to the server over the signaling WebSocket.
///
/// Serialized as a single JSON object tagged by `type`, matching the wire
/// contract the browser client already speaks. `webrtc_offer`,
/// `webrtc_answer` and `webrtc_ice_candidate` carry an optional `target`
/// peer id: present and different from the sender's own id, the record is
/// forwarded verbatim to that peer by the room registry instead of being
/// handled locally (used once a room holds more than two peers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    AesKeyExchange {
        encrypted_key: String,
    },
    StartVr {
        /// Optional override path for the media file or VR binary to run;
        /// an empty or absent value falls back to the server's configured
        /// default.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    StopStream,
    WebrtcOffer {
        offer: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    WebrtcAnswer {
        answer: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    WebrtcIceCandidate {
        candidate: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Gyro {
        alpha: f64,
        beta: f64,
        gamma: f64,
    },
    Hand {
        hands: HandTrackingPayload,
    },
    Pause,
    Resume,
    Terminate,
    Quality {
        value: i32,
    },
    ToggleVrDebugging {
        enabled: bool,
    },
    StartHandtracking,
    /// An encrypted envelope: `data` is base64 of `nonce || ciphertext+tag`.
    /// Once decrypted, the plaintext MUST parse as one of the other
    /// variants and is re-dispatched identically.
    EncryptedData {
        data: String,
    },
}

/// Records the server sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent immediately after a connection is accepted: the server's RSA
    /// public key (SPKI PEM, base64-encoded), the peer's assigned id, and
    /// the room it was placed in.
    Init {
        rsa_public_key: String,
        peer_id: String,
        room: String,
    },
    KeyExchangeComplete,
    PeerJoined {
        peer_id: String,
    },
    PeerLeft {
        peer_id: String,
    },
    /// Forwarded verbatim by the room registry when a client's
    /// `webrtc_offer` names a `target` other than the sender — used in a
    /// room with more than two peers, where offers are relayed mesh-style
    /// instead of always terminating at the server.
    WebrtcOffer {
        offer: serde_json::Value,
        from: String,
    },
    /// The server's own reply to a direct (non-forwarded) `webrtc_offer`:
    /// wire type `answer`, not `webrtc_answer` — that name is reserved for
    /// the room-forwarding path below, where a peer's own `webrtc_answer`
    /// record is relayed verbatim to another peer.
    Answer {
        answer: serde_json::Value,
        from: String,
    },
    WebrtcAnswer {
        answer: serde_json::Value,
        from: String,
    },
    WebrtcIceCandidate {
        candidate: serde_json::Value,
        from: String,
    },
    Status {
        message: String,
    },
    Error {
        message: String,
    },
    StreamStarted {
        message: String,
    },
    StreamStopped {
        message: String,
    },
    VrReady {
        message: String,
    },
    VrDebuggingStatus {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_tag_round_trips() {
        let msg = ClientMessage::AesKeyExchange {
            encrypted_key: "abc123".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "aes_key_exchange");
        assert_eq!(json["encrypted_key"], "abc123");

        let decoded: ClientMessage = serde_json::from_value(json).unwrap();
        match decoded {
            ClientMessage::AesKeyExchange { encrypted_key } => {
                assert_eq!(encrypted_key, "abc123")
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn webrtc_answer_target_is_optional() {
        let json = serde_json::json!({ "type": "webrtc_answer", "answer": {"sdp": "v=0", "type": "answer"} });
        let decoded: ClientMessage = serde_json::from_value(json).unwrap();
        match decoded {
            ClientMessage::WebrtcAnswer { answer, target } => {
                assert_eq!(answer["sdp"], "v=0");
                assert_eq!(target, None);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn start_vr_data_defaults_to_none() {
        let json = serde_json::json!({ "type": "start_vr" });
        let decoded: ClientMessage = serde_json::from_value(json).unwrap();
        assert!(matches!(decoded, ClientMessage::StartVr { data: None }));
    }

    #[test]
    fn forwarded_offer_serializes_with_from() {
        let msg = ServerMessage::WebrtcOffer {
            offer: serde_json::json!({"sdp": "v=0", "type": "offer"}),
            from: "peer-a".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "webrtc_offer");
        assert_eq!(json["from"], "peer-a");
    }

    #[test]
    fn answer_serializes_with_literal_answer_tag() {
        let msg = ServerMessage::Answer {
            answer: serde_json::json!({"sdp": "v=0", "type": "answer"}),
            from: "peer-1".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["from"], "peer-1");
    }

    #[test]
    fn hand_payload_round_trips() {
        let json = serde_json::json!({
            "type": "hand",
            "hands": {
                "payload": [{
                    "handedness": "Left",
                    "landmarks": [{"x": 0.1, "y": 0.2, "z": 0.3}],
                    "confidence": 0.9,
                }]
            }
        });
        let decoded: ClientMessage = serde_json::from_value(json).unwrap();
        match decoded {
            ClientMessage::Hand { hands } => {
                assert_eq!(hands.payload.len(), 1);
                assert_eq!(hands.payload[0].handedness, "Left");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn server_init_serializes_expected_fields() {
        let msg = ServerMessage::Init {
            rsa_public_key: "PEM".to_string(),
            peer_id: "peer-1".to_string(),
            room: "default".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "init");
        assert_eq!(json["peer_id"], "peer-1");
        assert_eq!(json["room"], "default");
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        let json = serde_json::json!({ "type": "not_a_real_message" });
        assert!(serde_json::from_value::<ClientMessage>(json).is_err());
    }
}
