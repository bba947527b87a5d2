use anyhow::Result;
use audiopus::coder::Encoder as OpusEncoder;
use audiopus::{Application, Bitrate, Channels, SampleRate};

/// Samples per channel in one Opus frame at 48kHz/20ms, per the channel
/// between the producer's PCM output and the outbound Opus track.
pub const OPUS_FRAME_SIZE: usize = 960;
pub const OPUS_SAMPLE_RATE: u32 = 48_000;
pub const OPUS_CHANNELS: usize = 2;
pub const OPUS_BITRATE: i32 = 64_000;

/// Largest Opus packet the encoder is configured to ever emit, used to
/// size the output buffer without a realloc per call.
const MAX_PACKET_BYTES: usize = 1275;

/// Wraps the Opus encoder with the stereo, 48kHz, 64kbit/s settings the
/// WebRTC audio track expects.
pub struct Encoder {
    inner: OpusEncoder,
}

impl Encoder {
    pub fn new() -> Result<Self> {
        let mut encoder = OpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
        encoder.set_bitrate(Bitrate::BitsPerSecond(OPUS_BITRATE))?;
        Ok(Self { inner: encoder })
    }

    /// Encodes one interleaved stereo frame of PCM f32 samples into Opus.
    ///
    /// `pcm` must contain exactly `OPUS_FRAME_SIZE * OPUS_CHANNELS`
    /// interleaved samples.
    pub fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>> {
        assert_eq!(
            pcm.len(),
            OPUS_FRAME_SIZE * OPUS_CHANNELS,
            "PCM frame must be exactly {} interleaved samples",
            OPUS_FRAME_SIZE * OPUS_CHANNELS
        );

        let mut output = vec![0u8; MAX_PACKET_BYTES];
        let len = self.inner.encode_float(pcm, &mut output)?;
        output.truncate(len);
        Ok(output)
    }

    pub fn frame_size(&self) -> usize {
        OPUS_FRAME_SIZE
    }

    pub fn sample_rate(&self) -> u32 {
        OPUS_SAMPLE_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_silence_without_error() {
        let mut encoder = Encoder::new().unwrap();
        let pcm = vec![0.0f32; OPUS_FRAME_SIZE * OPUS_CHANNELS];
        let packet = encoder.encode(&pcm).unwrap();
        assert!(!packet.is_empty());
        assert!(packet.len() <= MAX_PACKET_BYTES);
    }

    #[test]
    #[should_panic(expected = "interleaved samples")]
    fn rejects_wrong_frame_length() {
        let mut encoder = Encoder::new().unwrap();
        let pcm = vec![0.0f32; 100];
        let _ = encoder.encode(&pcm);
    }
}
