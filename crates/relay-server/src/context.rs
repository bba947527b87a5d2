use std::sync::Arc;

use relay_crypto::ServerIdentity;
use relay_signaling::SignalingEngine;

use crate::config::ServerConfig;
use crate::room::RoomRegistry;

/// Process-wide collaborators every session is built from: the
/// once-at-boot RSA identity (§9: "a single-writer, many-reader value
/// frozen after init"), the shared WebRTC codec registry, the room
/// registry, and the resolved configuration. Handed to each connection
/// as a single `Arc` clone rather than threading four separate `Arc`s
/// through every function signature.
pub struct ServerContext {
    pub config: ServerConfig,
    pub identity: Arc<ServerIdentity>,
    pub signaling: Arc<SignalingEngine>,
    pub rooms: Arc<RoomRegistry>,
}

impl ServerContext {
    pub fn new(config: ServerConfig, identity: ServerIdentity, signaling: SignalingEngine) -> Arc<Self> {
        Arc::new(Self {
            config,
            identity: Arc::new(identity),
            signaling: Arc::new(signaling),
            rooms: RoomRegistry::new(),
        })
    }
}
