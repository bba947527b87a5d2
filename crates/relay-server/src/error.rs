use thiserror::Error;

/// Errors raised while dispatching one inbound signaling record (§7).
/// Every variant here is recoverable at the record level: the session
/// that produced it stays alive, and `Session::dispatch`'s caller reports
/// the failure back to the client via an `error` record rather than
/// tearing anything down, except where noted.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed signaling record: {0}")]
    BadFormat(#[from] serde_json::Error),

    #[error("record rejected: channel cipher authentication failed")]
    AuthFail,

    /// §3: "SymKey ≠ ∅ is required before any encrypted or telemetry
    /// record is accepted." Dropped and logged, session retained.
    #[error("encrypted or telemetry record received before key exchange completed")]
    KeyExchangeRequired,

    /// Closes the session (§7: `BadKeyLength` ⇒ close session).
    #[error("crypto error: {0}")]
    Crypto(#[from] relay_crypto::CryptoError),

    #[error("producer error: {0}")]
    Producer(#[from] relay_producer::ProducerError),

    #[error("signaling error: {0}")]
    Signaling(#[from] relay_signaling::SignalingError),

    #[error("forward target `{0}` is not present in the room")]
    ForwardTargetUnknown(String),
}

impl SessionError {
    /// Whether this error, per §7's policy table, should close the whole
    /// session rather than just being reported back to the client.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Crypto(relay_crypto::CryptoError::BadKeyLength { .. }))
    }
}
