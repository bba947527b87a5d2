//! Spawns and supervises the external process that produces a session's
//! media: either an ffmpeg-transcoded file or a VR capture binary, either
//! way handed to the caller as a stream of [`relay_protocol::Frame`]s.

pub mod demux;
pub mod error;
pub mod nal;
pub mod supervisor;

pub use error::ProducerError;
pub use supervisor::{AudioMode, Producer, ProducerKind, ProducerStreams};
