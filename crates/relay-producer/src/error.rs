use thiserror::Error;

/// Errors raised while spawning, feeding, or reading from a producer
/// process.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("failed to spawn producer process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("producer has no stdin to forward telemetry to")]
    NoStdin,

    #[error("producer stdin is closed")]
    StdinClosed(#[source] std::io::Error),

    #[error("producer stdout closed before a complete frame was read")]
    StdoutClosed,

    #[error(transparent)]
    Frame(#[from] relay_protocol::ProtocolError),

    #[error("path `{0}` has no extension the producer supervisor recognizes")]
    UnrecognizedExtension(String),

    #[error("media file does not exist: {0}")]
    MediaFileNotFound(String),

    #[error("failed to probe media file: {0}")]
    ProbeFailed(#[source] std::io::Error),

    #[error("no video stream found in media file: {0}")]
    NoVideoStream(String),
}
