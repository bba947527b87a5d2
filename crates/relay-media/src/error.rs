use thiserror::Error;

/// Errors raised while pumping demuxed frames onto a peer's media tracks.
#[derive(Debug, Error)]
pub enum PumpError {
    /// The underlying track write failed because the peer connection has
    /// already torn down. Not a real error: the caller treats this as a
    /// normal shutdown and exits cleanly rather than propagating it.
    #[error("media track is closed")]
    Closed,

    #[error("failed to write sample to track: {0}")]
    TrackWriteFailed(String),

    #[error("audio encoder error: {0}")]
    Encode(#[from] anyhow::Error),
}
