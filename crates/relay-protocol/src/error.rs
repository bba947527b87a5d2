use thiserror::Error;

/// Errors raised while decoding or validating wire records and frame headers.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed signaling record: {0}")]
    MalformedRecord(#[from] serde_json::Error),

    #[error("signaling record missing required field `{0}`")]
    MissingField(&'static str),

    #[error("forward target `{0}` is not present in the room")]
    UnknownTarget(String),

    #[error("frame header has bad magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("frame declares size {declared}, which exceeds the maximum of {max}")]
    FrameTooLarge { declared: u32, max: u32 },

    #[error("buffer too short to contain a frame header ({0} bytes, need {1})")]
    ShortHeader(usize, usize),
}
