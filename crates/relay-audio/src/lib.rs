//! Opus encoding for the outbound audio track.

pub mod encoder;

pub use encoder::Encoder;
