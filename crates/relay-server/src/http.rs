use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use httparse::Status;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::warn;

use crate::context::ServerContext;
use crate::ws;

/// Headers larger than this are rejected rather than buffered forever.
const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// Wraps a stream whose first few bytes have already been consumed for
/// sniffing, replaying them before resuming reads from the underlying
/// stream. Lets the WebSocket upgrade handshake and the plain-HTTP
/// responders below share one read of the request line instead of each
/// needing their own framing.
struct Peeked<S> {
    prefix: Vec<u8>,
    prefix_pos: usize,
    inner: S,
}

impl<S: AsyncRead + Unpin> AsyncRead for Peeked<S> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if self.prefix_pos < self.prefix.len() {
            let remaining = self.prefix.len() - self.prefix_pos;
            let n = remaining.min(buf.remaining());
            let start = self.prefix_pos;
            buf.put_slice(&self.prefix[start..start + n]);
            self.prefix_pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Peeked<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Accepts one TLS-terminated connection and routes it to the WebSocket
/// signaling handshake, a static file, the `/video` viewer page, or a 404
/// (§4.2: "one HTTPS/WSS listener multiplexes WebRTC signaling and plain
/// HTTP"). Reads only as much of the request head as `httparse` needs to
/// decide, then hands the rest of the stream on unread.
pub async fn handle_connection<S>(stream: S, ctx: Arc<ServerContext>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut raw = Vec::with_capacity(1024);
    let mut stream = stream;

    let head = loop {
        let mut chunk = [0u8; 1024];
        let n = match stream.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "failed reading request head");
                return;
            }
        };
        raw.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&raw) {
            Ok(Status::Complete(header_len)) => {
                let method = req.method.unwrap_or("GET").to_string();
                let path = req.path.unwrap_or("/").to_string();
                let is_upgrade = req.headers.iter().any(|h| {
                    h.name.eq_ignore_ascii_case("upgrade") && h.value.eq_ignore_ascii_case(b"websocket")
                });
                let leftover = raw.split_off(header_len);
                break Some((method, path, is_upgrade, leftover));
            }
            Ok(Status::Partial) => {
                if raw.len() >= MAX_REQUEST_HEAD {
                    warn!("request head exceeded the {MAX_REQUEST_HEAD}-byte limit");
                    break None;
                }
            }
            Err(err) => {
                warn!(error = %err, "malformed request line");
                break None;
            }
        }
    };

    let Some((method, path, is_upgrade, leftover)) = head else {
        return;
    };

    let peeked = Peeked {
        prefix: leftover,
        prefix_pos: 0,
        inner: stream,
    };

    route(peeked, ctx, method, path, is_upgrade).await;
}

async fn route<S>(mut stream: Peeked<S>, ctx: Arc<ServerContext>, method: String, path: String, is_upgrade: bool)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (path_only, query) = match path.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (path, None),
    };

    if path_only.starts_with("/ws/webrtc") || path_only == "/ws" {
        if !is_upgrade {
            write_response(&mut stream, 400, "Bad Request", "expected a WebSocket upgrade").await;
            return;
        }
        let (peer_id, room) = parse_query(query.as_deref());
        match tokio_tungstenite::accept_async(stream).await {
            Ok(ws_stream) => ws::handle_connection(ctx, ws_stream, peer_id, room).await,
            Err(err) => warn!(error = %err, "WebSocket handshake failed"),
        }
        return;
    }

    if method != "GET" {
        write_response(&mut stream, 405, "Method Not Allowed", "").await;
        return;
    }

    if path_only == "/video" || path_only == "/" {
        serve_file(&mut stream, Path::new(&ctx.config.static_dir).join("stream.html")).await;
        return;
    }

    if let Some(rel) = path_only.strip_prefix("/static/") {
        match safe_join(&ctx.config.static_dir, rel) {
            Some(full) => serve_file(&mut stream, full).await,
            None => write_response(&mut stream, 403, "Forbidden", "").await,
        }
        return;
    }

    write_response(&mut stream, 404, "Not Found", "").await;
}

/// Rejects any relative path that climbs out of `root` via `..` or that
/// is itself absolute.
fn safe_join(root: &str, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    let escapes = rel_path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir | std::path::Component::RootDir | std::path::Component::Prefix(_)));
    if escapes {
        return None;
    }
    Some(Path::new(root).join(rel_path))
}

fn parse_query(query: Option<&str>) -> (Option<String>, Option<String>) {
    let mut peer_id = None;
    let mut room = None;
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                match key {
                    "peer_id" => peer_id = Some(value.to_string()),
                    "room" => room = Some(value.to_string()),
                    _ => {}
                }
            }
        }
    }
    (peer_id, room)
}

async fn serve_file<S>(stream: &mut Peeked<S>, path: PathBuf)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::fs::read(&path).await {
        Ok(body) => {
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                guess_content_type(&path),
                body.len()
            );
            let _ = stream.write_all(header.as_bytes()).await;
            let _ = stream.write_all(&body).await;
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "static file not found");
            write_response(stream, 404, "Not Found", "not found").await;
            return;
        }
    }
    let _ = stream.shutdown().await;
}

async fn write_response<S>(stream: &mut Peeked<S>, status: u16, reason: &str, body: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes()).await;
    let _ = stream.write_all(body.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("wasm") => "application/wasm",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_reads_both_fields() {
        let (peer_id, room) = parse_query(Some("peer_id=abc&room=lobby"));
        assert_eq!(peer_id, Some("abc".to_string()));
        assert_eq!(room, Some("lobby".to_string()));
    }

    #[test]
    fn parse_query_handles_absent_query() {
        assert_eq!(parse_query(None), (None, None));
    }

    #[test]
    fn safe_join_rejects_parent_dir_escape() {
        assert!(safe_join("static", "../secret").is_none());
        assert!(safe_join("static", "/etc/passwd").is_none());
        assert!(safe_join("static", "video.html").is_some());
    }

    #[test]
    fn guess_content_type_matches_known_extensions() {
        assert_eq!(guess_content_type(Path::new("a.html")), "text/html; charset=utf-8");
        assert_eq!(guess_content_type(Path::new("a.bin")), "application/octet-stream");
    }
}
