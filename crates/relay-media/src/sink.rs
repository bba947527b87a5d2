use async_trait::async_trait;
use relay_protocol::Sample;

use crate::error::PumpError;

/// Where a pump's packetized samples go: the video and audio tracks bound
/// to a peer connection. Implemented by `relay-signaling::Peer` so this
/// crate stays free of any dependency on the WebRTC stack itself.
///
/// One method per track rather than a single `Sample`-routed write, since
/// the video and audio pumps run as independent tasks (§4.5) and each only
/// ever knows its own track.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn write_video(&self, bytes: Vec<u8>, duration_ms: u32) -> Result<(), PumpError>;
    async fn write_audio(&self, bytes: Vec<u8>, duration_ms: u32) -> Result<(), PumpError>;

    /// Convenience wrapper dispatching on [`Sample::kind`].
    async fn write_sample(&self, sample: Sample) -> Result<(), PumpError> {
        match sample.kind {
            relay_protocol::SampleKind::Video => self.write_video(sample.bytes, sample.duration_ms).await,
            relay_protocol::SampleKind::Audio => self.write_audio(sample.bytes, sample.duration_ms).await,
        }
    }
}
