use std::path::{Path, PathBuf};
use std::process::Stdio;

use relay_protocol::{Frame, FrameHeader, PixelFormat};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::demux::FrameDemuxer;
use crate::error::ProducerError;
use crate::nal::NalSplitter;

/// Video dimensions reported on synthesized file-transcode frame headers
/// when the caller doesn't know the source file's real resolution.
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

const VIDEO_READ_CHUNK: usize = 32 * 1024;
/// One 20ms stereo PCM frame at 48kHz, 32-bit float samples, from the
/// file-transcode producer's auxiliary audio stream.
const FILE_AUDIO_READ_CHUNK: usize = 960 * 2 * 4;
/// One 20ms stereo PCM frame at 48kHz, signed 16-bit samples, from a
/// VR-mode audio-capture transcoder.
pub const VR_AUDIO_READ_CHUNK: usize = 960 * 2 * 2;

const OUTBOUND_FRAME_BUFFER: usize = 64;

/// Extensions routed to the file-transcode producer.
const FILE_EXTENSIONS: &[&str] = &["mp4", "mkv", "webp", "mp3", "flac", "wav", "aac"];
/// Extensions routed to the VR binary producer.
const VR_EXTENSIONS: &[&str] = &["exe", "elf"];

/// Which strategy the audio pump on the other end of a producer's audio
/// channel should use. The file-transcode producer hands over chunks the
/// pump writes straight through (§4.5); an optional VR-mode capture hands
/// over raw PCM the pump must Opus-encode first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    /// No audio channel will ever produce frames (closes immediately).
    None,
    /// Chunks are already in a track-writable form; pace and forward.
    Passthrough,
    /// Chunks are raw 16-bit PCM; Opus-encode before writing.
    RawPcm,
}

/// What kind of external process backs a session's media, selected by the
/// extension of the path the client asked to stream (§4.3).
pub enum ProducerKind {
    /// A local media file, transcoded on the fly by ffmpeg. Produces two
    /// child processes (video-only, audio-only elementary streams), each
    /// wrapped into the frame format locally since ffmpeg has no notion
    /// of it.
    FileTranscode {
        media_path: PathBuf,
        width: u32,
        height: u32,
    },
    /// A VR capture/streaming binary that emits the 24-byte-header framed
    /// video format natively on its own stdout, and accepts
    /// reverse-channel telemetry (gyro, hand tracking) on stdin. The VR
    /// stdout stream is video-only (§3: non-H264 frames are dropped with
    /// a warning); `audio_capture_device`, when set, spawns a second
    /// child that records the named platform audio device and feeds the
    /// audio channel instead.
    VrBinary {
        binary_path: PathBuf,
        room: String,
        audio_capture_device: Option<String>,
    },
}

impl ProducerKind {
    /// Classifies `path` by extension per §4.3's two extension sets.
    /// Returns `None` for an unrecognized or missing extension rather
    /// than guessing a producer kind.
    pub fn for_path(path: &Path, room: &str, audio_capture_device: Option<String>) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if FILE_EXTENSIONS.contains(&ext.as_str()) {
            Some(ProducerKind::FileTranscode {
                media_path: path.to_path_buf(),
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
            })
        } else if VR_EXTENSIONS.contains(&ext.as_str()) {
            Some(ProducerKind::VrBinary {
                binary_path: path.to_path_buf(),
                room: room.to_string(),
                audio_capture_device,
            })
        } else {
            None
        }
    }

    /// Optional pre-flight check for a file-transcode producer, mirroring
    /// `ValidateMediaFile` in the original source: confirms the path
    /// exists and that `ffprobe` reports at least one video stream.
    /// A no-op for `VrBinary`, which has no source file to probe.
    /// Supplemental, not load-bearing — `spawn` would simply fail with
    /// `Spawn` once ffmpeg itself chokes on a bad file, so callers may
    /// skip this when they'd rather not pay for an extra process per
    /// `start_vr`.
    pub async fn validate(&self) -> Result<(), ProducerError> {
        let media_path = match self {
            ProducerKind::FileTranscode { media_path, .. } => media_path,
            ProducerKind::VrBinary { .. } => return Ok(()),
        };

        if tokio::fs::metadata(media_path).await.is_err() {
            return Err(ProducerError::MediaFileNotFound(
                media_path.display().to_string(),
            ));
        }

        let output = Command::new("ffprobe")
            .args(["-v", "error", "-select_streams", "v:0", "-show_entries", "stream=codec_name", "-of", "csv=p=0"])
            .arg(media_path)
            .output()
            .await
            .map_err(ProducerError::ProbeFailed)?;

        if output.stdout.is_empty() {
            return Err(ProducerError::NoVideoStream(media_path.display().to_string()));
        }

        debug!(media_path = %media_path.display(), "media file validation successful");
        Ok(())
    }

    pub fn audio_mode(&self) -> AudioMode {
        match self {
            ProducerKind::FileTranscode { .. } => AudioMode::Passthrough,
            ProducerKind::VrBinary {
                audio_capture_device,
                ..
            } => {
                if audio_capture_device.is_some() {
                    AudioMode::RawPcm
                } else {
                    AudioMode::None
                }
            }
        }
    }
}

/// The two independently-paced channels a producer hands off to the media
/// pump, per §5: "the two iterations run in independent tasks because
/// their pacing is independent."
pub struct ProducerStreams {
    pub video: mpsc::Receiver<Frame>,
    pub audio: mpsc::Receiver<Frame>,
}

/// Owns the child process(es) backing one session's media stream.
///
/// Dropping or calling [`shutdown`](Producer::shutdown) kills every child
/// process it owns; shutdown is idempotent; calling it twice, or dropping
/// after an explicit shutdown, is a no-op rather than a panic.
pub struct Producer {
    children: Vec<Child>,
    stdin: Option<ChildStdin>,
}

impl Producer {
    /// Spawns the producer and returns it along with its video and audio
    /// channels. An audio channel with no source (e.g. a VR binary with
    /// no capture device configured) closes immediately rather than
    /// blocking its pump forever — the sender is simply dropped.
    pub async fn spawn(kind: ProducerKind) -> Result<(Self, ProducerStreams), ProducerError> {
        match kind {
            ProducerKind::FileTranscode {
                media_path,
                width,
                height,
            } => Self::spawn_file_transcode(media_path, width, height).await,
            ProducerKind::VrBinary {
                binary_path,
                room,
                audio_capture_device,
            } => Self::spawn_vr_binary(binary_path, room, audio_capture_device).await,
        }
    }

    async fn spawn_file_transcode(
        media_path: PathBuf,
        width: u32,
        height: u32,
    ) -> Result<(Self, ProducerStreams), ProducerError> {
        let mut video_child = Command::new("ffmpeg")
            .args(["-re", "-i"])
            .arg(&media_path)
            .args([
                "-c:v", "libx264",
                "-preset", "ultrafast",
                "-tune", "zerolatency",
                "-pix_fmt", "yuv420p",
                "-profile:v", "baseline",
                "-level", "3.1",
                "-g", "30",
                "-keyint_min", "30",
                "-sc_threshold", "0",
                "-b:v", "1M",
                "-maxrate", "1M",
                "-bufsize", "2M",
                "-an",
                "-f", "h264",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(ProducerError::Spawn)?;

        let mut audio_child = Command::new("ffmpeg")
            .args(["-re", "-i"])
            .arg(&media_path)
            .args([
                "-vn",
                "-f", "f32le",
                "-ar", "48000",
                "-ac", "2",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(ProducerError::Spawn)?;

        let video_stdout = video_child.stdout.take().expect("piped stdout");
        let audio_stdout = audio_child.stdout.take().expect("piped stdout");

        let (video_tx, video_rx) = mpsc::channel(OUTBOUND_FRAME_BUFFER);
        let (audio_tx, audio_rx) = mpsc::channel(OUTBOUND_FRAME_BUFFER);

        tokio::spawn(pump_video_elementary_stream(video_stdout, width, height, video_tx));
        tokio::spawn(pump_file_audio_stream(audio_stdout, audio_tx));

        Ok((
            Self {
                children: vec![video_child, audio_child],
                stdin: None,
            },
            ProducerStreams {
                video: video_rx,
                audio: audio_rx,
            },
        ))
    }

    async fn spawn_vr_binary(
        binary_path: PathBuf,
        room: String,
        audio_capture_device: Option<String>,
    ) -> Result<(Self, ProducerStreams), ProducerError> {
        let mut child = Command::new(&binary_path)
            .args(["--webrtc", "--room", &room])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ProducerError::Spawn)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        tokio::spawn(drain_stderr(stderr));

        let (video_tx, video_rx) = mpsc::channel(OUTBOUND_FRAME_BUFFER);
        tokio::spawn(pump_framed_stream(stdout, video_tx));

        let mut children = vec![child];
        let (audio_tx, audio_rx) = mpsc::channel(OUTBOUND_FRAME_BUFFER);

        if let Some(device) = audio_capture_device {
            let mut capture_child = Command::new("ffmpeg")
                .args(["-f", "pulse", "-i"])
                .arg(&device)
                .args(["-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .map_err(ProducerError::Spawn)?;
            let capture_stdout = capture_child.stdout.take().expect("piped stdout");
            tokio::spawn(pump_vr_audio_capture(capture_stdout, audio_tx));
            children.push(capture_child);
        }
        // else: audio_tx drops here, audio_rx observes a closed channel
        // and the caller's audio pump exits cleanly on its first recv.

        Ok((
            Self { children, stdin },
            ProducerStreams {
                video: video_rx,
                audio: audio_rx,
            },
        ))
    }

    /// Writes one line of reverse-channel telemetry (gyro or hand
    /// tracking JSON) to the producer's stdin, newline-terminated.
    ///
    /// Only a [`ProducerKind::VrBinary`] has a writable stdin; forwarding
    /// telemetry to a file-transcode producer is a logic error in the
    /// caller, reported rather than silently dropped.
    pub async fn write_telemetry_line(&mut self, line: &str) -> Result<(), ProducerError> {
        let stdin = self.stdin.as_mut().ok_or(ProducerError::NoStdin)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(ProducerError::StdinClosed)?;
        stdin.write_all(b"\n").await.map_err(ProducerError::StdinClosed)?;
        Ok(())
    }

    /// Kills every child process this producer owns. Safe to call more
    /// than once.
    pub async fn shutdown(&mut self) {
        self.stdin = None;
        for child in &mut self.children {
            if let Ok(Some(_)) = child.try_wait() {
                continue;
            }
            if let Err(err) = child.kill().await {
                warn!(error = %err, "failed to kill producer child process");
            }
            let _ = child.wait().await;
        }
    }
}

async fn drain_stderr(stderr: tokio::process::ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(producer_stderr = %line);
    }
}

async fn pump_framed_stream(stdout: tokio::process::ChildStdout, tx: mpsc::Sender<Frame>) {
    let mut demuxer = FrameDemuxer::new(stdout);
    loop {
        match demuxer.next_frame().await {
            Ok(Some(frame)) => {
                if frame.header.pixel_format != PixelFormat::H264AnnexB {
                    let pixel_format = frame.header.pixel_format;
                    warn!(?pixel_format, "dropping non-video frame on VR video stream");
                    continue;
                }
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!("producer stdout closed cleanly");
                return;
            }
            Err(err) => {
                warn!(error = %err, "framed producer stream ended with an error");
                return;
            }
        }
    }
}

async fn pump_video_elementary_stream(
    mut stdout: tokio::process::ChildStdout,
    width: u32,
    height: u32,
    tx: mpsc::Sender<Frame>,
) {
    let width = if width == 0 { DEFAULT_WIDTH } else { width };
    let height = if height == 0 { DEFAULT_HEIGHT } else { height };
    let mut splitter = NalSplitter::new();
    let mut chunk = vec![0u8; VIDEO_READ_CHUNK];

    loop {
        let n = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "video elementary stream read failed");
                return;
            }
        };

        let units = splitter.push(&chunk[..n]);

        for unit in units {
            let frame = Frame {
                header: FrameHeader {
                    timestamp_ms: timestamp_ms(),
                    frame_size: unit.len() as u32,
                    width,
                    height,
                    pixel_format: PixelFormat::H264AnnexB,
                },
                payload: unit,
            };
            if tx.send(frame).await.is_err() {
                return;
            }
        }
    }

    if let Some(tail) = splitter.flush() {
        let frame = Frame {
            header: FrameHeader {
                timestamp_ms: timestamp_ms(),
                frame_size: tail.len() as u32,
                width,
                height,
                pixel_format: PixelFormat::H264AnnexB,
            },
            payload: tail,
        };
        let _ = tx.send(frame).await;
    }
}

/// Reads fixed-size chunks of a file-mode producer's auxiliary audio
/// stream and forwards each as one frame; the media pump writes these
/// straight through at a constant 20ms cadence (§4.5).
async fn pump_file_audio_stream(mut stdout: tokio::process::ChildStdout, tx: mpsc::Sender<Frame>) {
    let mut chunk = vec![0u8; FILE_AUDIO_READ_CHUNK];

    loop {
        let n = match read_exact_or_eof(&mut stdout, &mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "audio elementary stream read failed");
                return;
            }
        };

        let frame = Frame {
            header: FrameHeader {
                timestamp_ms: timestamp_ms(),
                frame_size: n as u32,
                width: 0,
                height: 0,
                pixel_format: PixelFormat::Pcm,
            },
            payload: chunk[..n].to_vec(),
        };
        if tx.send(frame).await.is_err() {
            return;
        }
    }
}

/// Reads fixed 20ms PCM chunks from a VR-mode audio-capture transcoder.
/// The media pump Opus-encodes each chunk before writing it as a sample.
async fn pump_vr_audio_capture(mut stdout: tokio::process::ChildStdout, tx: mpsc::Sender<Frame>) {
    let mut chunk = vec![0u8; VR_AUDIO_READ_CHUNK];

    loop {
        let n = match read_exact_or_eof(&mut stdout, &mut chunk).await {
            Ok(0) => break,
            Ok(n) if n < VR_AUDIO_READ_CHUNK => {
                debug!(got = n, want = VR_AUDIO_READ_CHUNK, "short final PCM chunk, dropping");
                break;
            }
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "audio capture stream read failed");
                return;
            }
        };

        let frame = Frame {
            header: FrameHeader {
                timestamp_ms: timestamp_ms(),
                frame_size: n as u32,
                width: 0,
                height: 0,
                pixel_format: PixelFormat::Pcm,
            },
            payload: chunk[..n].to_vec(),
        };
        if tx.send(frame).await.is_err() {
            return;
        }
    }
}

/// Reads up to `buf.len()` bytes, looping until either the buffer fills
/// or the stream ends, so a short read from the pipe doesn't produce an
/// under-sized audio frame.
async fn read_exact_or_eof(
    stdout: &mut tokio::process::ChildStdout,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stdout.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Wall-clock timestamp for a freshly synthesized frame, milliseconds
/// since the Unix epoch truncated to `u32` (matches the header's field
/// width; wraps after ~49 days, same as the source format it mirrors).
fn timestamp_ms() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_extensions_route_to_file_transcode() {
        let kind = ProducerKind::for_path(Path::new("clip.mp4"), "default", None).unwrap();
        assert!(matches!(kind, ProducerKind::FileTranscode { .. }));
        assert_eq!(kind.audio_mode(), AudioMode::Passthrough);
    }

    #[test]
    fn vr_extensions_route_to_vr_binary() {
        let kind = ProducerKind::for_path(Path::new("game.exe"), "room-1", None).unwrap();
        assert!(matches!(kind, ProducerKind::VrBinary { .. }));
        assert_eq!(kind.audio_mode(), AudioMode::None);
    }

    #[test]
    fn vr_binary_with_capture_device_wants_opus_encode() {
        let kind =
            ProducerKind::for_path(Path::new("game.elf"), "room-1", Some("default".into())).unwrap();
        assert_eq!(kind.audio_mode(), AudioMode::RawPcm);
    }

    #[test]
    fn unrecognized_extension_is_none() {
        assert!(ProducerKind::for_path(Path::new("archive.zip"), "default", None).is_none());
    }

    #[test]
    fn missing_extension_is_none() {
        assert!(ProducerKind::for_path(Path::new("no_extension"), "default", None).is_none());
    }

    #[tokio::test]
    async fn validate_rejects_missing_file() {
        let kind = ProducerKind::for_path(Path::new("/no/such/clip.mp4"), "default", None).unwrap();
        let err = kind.validate().await.unwrap_err();
        assert!(matches!(err, ProducerError::MediaFileNotFound(_)));
    }

    #[tokio::test]
    async fn validate_is_a_no_op_for_vr_binary() {
        let kind = ProducerKind::for_path(Path::new("/no/such/game.exe"), "room-1", None).unwrap();
        assert!(kind.validate().await.is_ok());
    }
}
