use std::sync::Arc;

use relay_audio::Encoder;
use relay_protocol::{Frame, PixelFormat, Sample, SampleKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::PumpError;
use crate::sink::MediaSink;

/// Video sample durations are clamped to this floor, matching the data
/// model's "cap ≈ 143 fps" note so a burst of identically-timestamped
/// frames never produces a zero-length sample.
pub const MIN_VIDEO_DURATION_MS: u32 = 7;

/// Opus carries exactly one 20ms frame per packet at 48kHz/960
/// samples-per-channel; file-mode audio chunks are paced the same way
/// even though they aren't individually timestamped.
pub const AUDIO_DURATION_MS: u32 = 20;

/// One interleaved stereo PCM chunk handed to the VR-mode audio pump:
/// 960 samples per channel, 2 bytes per sample (signed 16-bit), 2
/// channels.
pub const VR_AUDIO_CHUNK_BYTES: usize = relay_audio::encoder::OPUS_FRAME_SIZE * relay_audio::encoder::OPUS_CHANNELS * 2;

/// Draws demuxed H.264 frames off `frames` and writes them to the video
/// track, deriving each sample's duration from the gap between successive
/// producer timestamps. Frames whose pixel format isn't H.264 are dropped
/// with a warning rather than written — the VR producer's framed stdout is
/// video-only by contract, but a misbehaving producer could still emit
/// something else.
///
/// Exits cleanly (`Ok(())`) on cancellation, channel close, or once the
/// sink reports [`PumpError::Closed`] — all three are normal shutdown, not
/// failure.
pub async fn run_video_pump(
    mut frames: mpsc::Receiver<Frame>,
    sink: Arc<dyn MediaSink>,
    cancel: CancellationToken,
) -> Result<(), PumpError> {
    let mut previous_ts: Option<u32> = None;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };

        if frame.header.pixel_format != PixelFormat::H264AnnexB {
            warn!(pixel_format = ?frame.header.pixel_format, "dropping non-H264 video frame");
            continue;
        }

        let ts = frame.header.timestamp_ms;
        let duration_ms = match previous_ts {
            None => MIN_VIDEO_DURATION_MS,
            Some(prev) => ts.saturating_sub(prev).max(MIN_VIDEO_DURATION_MS),
        };
        previous_ts = Some(ts);

        let sample = Sample {
            kind: SampleKind::Video,
            bytes: frame.payload,
            duration_ms,
        };
        match sink.write_sample(sample).await {
            Ok(()) => {}
            Err(PumpError::Closed) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

/// File-mode audio path: the producer already hands over fixed-size
/// chunks of its auxiliary audio stream (Opus or raw PCM, an operator
/// concern — see `relay-producer`), so the pump just paces them onto the
/// audio track at a constant 20ms per chunk with no further encoding.
pub async fn run_audio_passthrough_pump(
    mut frames: mpsc::Receiver<Frame>,
    sink: Arc<dyn MediaSink>,
    cancel: CancellationToken,
) -> Result<(), PumpError> {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };

        match sink.write_audio(frame.payload, AUDIO_DURATION_MS).await {
            Ok(()) => {}
            Err(PumpError::Closed) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

/// VR-mode audio path: the optional audio-capture transcoder hands over
/// raw little-endian signed-16 PCM, stereo, 48kHz, in 20ms chunks. Each
/// chunk is Opus-encoded before being written as one sample.
pub async fn run_audio_opus_pump(
    mut frames: mpsc::Receiver<Frame>,
    mut encoder: Encoder,
    sink: Arc<dyn MediaSink>,
    cancel: CancellationToken,
) -> Result<(), PumpError> {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };

        if frame.payload.len() != VR_AUDIO_CHUNK_BYTES {
            warn!(
                len = frame.payload.len(),
                expected = VR_AUDIO_CHUNK_BYTES,
                "dropping undersized PCM chunk"
            );
            continue;
        }

        let pcm: Vec<f32> = frame
            .payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
            .collect();

        let packet = encoder.encode(&pcm)?;

        match sink.write_audio(packet, AUDIO_DURATION_MS).await {
            Ok(()) => {}
            Err(PumpError::Closed) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::FrameHeader;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingSink {
        video: Mutex<Vec<(Vec<u8>, u32)>>,
        fail_after: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                video: Mutex::new(Vec::new()),
                fail_after: AtomicUsize::new(usize::MAX),
            }
        }
    }

    #[async_trait::async_trait]
    impl MediaSink for RecordingSink {
        async fn write_video(&self, bytes: Vec<u8>, duration_ms: u32) -> Result<(), PumpError> {
            let mut guard = self.video.lock().unwrap();
            if guard.len() >= self.fail_after.load(Ordering::SeqCst) {
                return Err(PumpError::Closed);
            }
            guard.push((bytes, duration_ms));
            Ok(())
        }

        async fn write_audio(&self, _bytes: Vec<u8>, _duration_ms: u32) -> Result<(), PumpError> {
            Ok(())
        }
    }

    fn video_frame(ts: u32, payload: &[u8]) -> Frame {
        Frame {
            header: FrameHeader {
                timestamp_ms: ts,
                frame_size: payload.len() as u32,
                width: 1280,
                height: 720,
                pixel_format: PixelFormat::H264AnnexB,
            },
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn first_frame_gets_the_duration_floor_then_derives_from_gaps() {
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();

        tx.send(video_frame(0, b"nal-one")).await.unwrap();
        tx.send(video_frame(33, b"nal-two")).await.unwrap();
        drop(tx);

        run_video_pump(rx, sink.clone(), cancel).await.unwrap();

        let written = sink.video.lock().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].1, 7);
        assert_eq!(written[1].1, 33);
    }

    #[tokio::test]
    async fn non_h264_frames_are_dropped_not_written() {
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();

        let mut pcm_tagged = video_frame(0, b"oops");
        pcm_tagged.header.pixel_format = PixelFormat::Pcm;
        tx.send(pcm_tagged).await.unwrap();
        drop(tx);

        run_video_pump(rx, sink.clone(), cancel).await.unwrap();
        assert!(sink.video.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_closed_ends_the_pump_cleanly() {
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(RecordingSink::new());
        sink.fail_after.store(0, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        tx.send(video_frame(0, b"nal")).await.unwrap();
        drop(tx);

        let result = run_video_pump(rx, sink, cancel).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancellation_stops_the_pump_without_consuming_pending_frames() {
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        tx.send(video_frame(0, b"nal")).await.unwrap();

        run_video_pump(rx, sink.clone(), cancel).await.unwrap();
        assert!(sink.video.lock().unwrap().is_empty());
    }
}
