/// Which track a demuxed [`Sample`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Video,
    Audio,
}

/// A packetized media unit ready to hand to the peer connection's track:
/// encoded bytes plus the duration it occupies on the timeline.
///
/// Video durations are derived from successive producer timestamps
/// (clamped to a 7ms floor); audio durations are a constant 20ms, one
/// Opus frame at 48kHz/960 samples-per-channel.
#[derive(Debug, Clone)]
pub struct Sample {
    pub kind: SampleKind,
    pub bytes: Vec<u8>,
    pub duration_ms: u32,
}
