//! Draws demuxed frames off a producer's output channels and paces them
//! onto a peer connection's video/audio tracks under backpressure.
//!
//! Video and audio are independent tasks (see [`pump::run_video_pump`],
//! [`pump::run_audio_passthrough_pump`], [`pump::run_audio_opus_pump`])
//! since their pacing is unrelated; both write through the [`MediaSink`]
//! trait so this crate never depends on the WebRTC stack itself.

pub mod error;
pub mod pump;
pub mod sink;

pub use error::PumpError;
pub use pump::{
    run_audio_opus_pump, run_audio_passthrough_pump, run_video_pump, AUDIO_DURATION_MS, MIN_VIDEO_DURATION_MS,
    VR_AUDIO_CHUNK_BYTES,
};
pub use sink::MediaSink;
