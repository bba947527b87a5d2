use bytes::BytesMut;
use relay_protocol::{Frame, FrameHeader, ProtocolError, HEADER_LEN};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::error::ProducerError;

/// Pulls length-framed [`Frame`]s out of a producer's raw stdout stream.
///
/// Used for a VR binary, which is expected to emit the 24-byte header
/// format natively. File-transcode producers build [`Frame`]s directly
/// from ffmpeg's elementary streams instead (see [`crate::supervisor`])
/// and never go through this reader.
pub struct FrameDemuxer<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameDemuxer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Reads one complete frame, blocking on stdout reads as needed.
    /// Returns `Ok(None)` once the stream ends cleanly at a frame
    /// boundary.
    ///
    /// A bad magic value is logged and skipped by discarding exactly one
    /// header-sized chunk — §4.4 explicitly rules out scanning for
    /// resynchronization, since the protocol assumes header-aligned
    /// streams — and a declared `size = 0` is skipped without emitting a
    /// frame, per §4.4's "if size = 0, continue". Neither terminates the
    /// demux; only a short read mid-record ([`ProducerError::StdoutClosed`])
    /// does.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, ProducerError> {
        loop {
            if self.buf.len() >= HEADER_LEN {
                let header = match FrameHeader::parse(&self.buf) {
                    Ok(header) => header,
                    Err(ProtocolError::BadMagic(magic)) => {
                        warn!(magic, "frame header had bad magic, discarding header-aligned chunk");
                        self.buf.split_to(HEADER_LEN);
                        continue;
                    }
                    Err(ProtocolError::ShortHeader(_, _)) => unreachable!(),
                    Err(other) => return Err(other.into()),
                };
                let total = HEADER_LEN + header.frame_size as usize;
                if self.buf.len() >= total {
                    let mut frame_bytes = self.buf.split_to(total);
                    if header.frame_size == 0 {
                        continue;
                    }
                    let payload = frame_bytes.split_off(HEADER_LEN).to_vec();
                    return Ok(Some(Frame { header, payload }));
                }
            }

            let mut chunk = [0u8; 16 * 1024];
            let n = self
                .reader
                .read(&mut chunk)
                .await
                .map_err(|_| ProducerError::StdoutClosed)?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProducerError::StdoutClosed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::PixelFormat;
    use std::io::Cursor;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let header = FrameHeader {
            timestamp_ms: 1,
            frame_size: payload.len() as u32,
            width: 0,
            height: 0,
            pixel_format: PixelFormat::Pcm,
        };
        let mut out = header.encode().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn reads_one_frame_delivered_whole() {
        let data = framed(b"audio-bytes");
        let mut demuxer = FrameDemuxer::new(Cursor::new(data));
        let frame = demuxer.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.payload, b"audio-bytes");
    }

    #[tokio::test]
    async fn reads_two_frames_back_to_back() {
        let mut data = framed(b"one");
        data.extend_from_slice(&framed(b"two"));
        let mut demuxer = FrameDemuxer::new(Cursor::new(data));

        let first = demuxer.next_frame().await.unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        let second = demuxer.next_frame().await.unwrap().unwrap();
        assert_eq!(second.payload, b"two");
        assert!(demuxer.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let data = framed(b"partial")[..20].to_vec();
        let mut demuxer = FrameDemuxer::new(Cursor::new(data));
        assert!(demuxer.next_frame().await.is_err());
    }

    #[tokio::test]
    async fn bad_magic_is_skipped_and_the_next_frame_still_reads() {
        let mut data = framed(b"garbage");
        data[0] = 0; // corrupt the magic of the first header
        data.extend_from_slice(&framed(b"good"));
        let mut demuxer = FrameDemuxer::new(Cursor::new(data));

        // The corrupted header's own 24 bytes are discarded; what follows
        // (its stale "garbage"-sized payload, then the second header) is
        // no longer aligned, so nothing meaningful is guaranteed to parse
        // before EOF — but the demuxer must not error out immediately and
        // must keep offering frames until the stream is exhausted.
        loop {
            match demuxer.next_frame().await {
                Ok(Some(_)) | Ok(None) => break,
                Err(_) => panic!("bad magic must not terminate the demux with an error"),
            }
        }
    }

    #[tokio::test]
    async fn zero_size_frame_is_skipped_not_emitted() {
        let zero = FrameHeader {
            timestamp_ms: 1,
            frame_size: 0,
            width: 0,
            height: 0,
            pixel_format: PixelFormat::Pcm,
        };
        let mut data = zero.encode().to_vec();
        data.extend_from_slice(&framed(b"after-empty"));
        let mut demuxer = FrameDemuxer::new(Cursor::new(data));

        let frame = demuxer.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.payload, b"after-empty");
    }
}
