//! Bounded forwarding of parsed requests to the local service.
//!
//! One request, one connection: the local hop always runs with
//! `connection: close` so the end of the response is the end of the
//! stream, and a content-length, when the local server declares one, only
//! shortens the read. No retries happen at this layer.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use vortex_shared::codec::{self, ParsedRequest};
use vortex_shared::protocol::MAX_RESPONSE_BYTES;
use vortex_shared::{Error, Result};

/// Default deadline for one local round trip.
pub const LOCAL_FORWARD_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Forward one request to the local service and render the full response.
///
/// Fails with `LocalUnreachable` when no connection can be established and
/// `LocalTimeout` when no complete response arrives within the deadline. A
/// response body crossing the size limit is replaced by a synthesized 502
/// and returned as a normal response, not an error.
pub async fn forward(req: &ParsedRequest, local_port: u16, deadline: Duration) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect(("127.0.0.1", local_port))
        .await
        .map_err(|e| Error::LocalUnreachable(e.to_string()))?;

    let raw = render_local_request(req, local_port);
    tokio::time::timeout(deadline, exchange(&mut stream, &raw))
        .await
        .map_err(|_| Error::LocalTimeout)?
}

async fn exchange(stream: &mut TcpStream, raw: &[u8]) -> Result<Vec<u8>> {
    stream
        .write_all(raw)
        .await
        .map_err(|e| Error::LocalUnreachable(e.to_string()))?;
    read_response(stream).await
}

/// Rebuild the request for the local hop from its parsed form.
fn render_local_request(req: &ParsedRequest, local_port: u16) -> Vec<u8> {
    let mut head = format!("{} {} HTTP/1.1\r\n", req.method, req.path);
    let mut has_host = false;
    let mut has_length = false;
    for (key, value) in &req.headers {
        // The local hop is one-shot; its connection semantics are ours.
        if key == "connection" {
            continue;
        }
        if key == "host" {
            has_host = true;
        }
        if key == "content-length" {
            has_length = true;
        }
        head.push_str(key);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    if !has_host {
        head.push_str(&format!("host: 127.0.0.1:{}\r\n", local_port));
    }
    if !has_length && !req.body.is_empty() {
        head.push_str(&format!("content-length: {}\r\n", req.body.len()));
    }
    head.push_str("connection: close\r\n\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(&req.body);
    out
}

async fn read_response(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    // Header section first.
    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::LocalUnreachable(e.to_string()))?;
        if n == 0 {
            return Err(Error::LocalUnreachable(
                "connection closed before response headers".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_RESPONSE_BYTES {
            return Ok(oversize_response());
        }
    };

    let head = buf[..header_end].to_vec();
    let (status, status_text) =
        codec::response_status(&head).unwrap_or((200, "OK".to_string()));

    let mut headers: Vec<(String, String)> = Vec::new();
    let mut content_length: Option<usize> = None;
    for line in head.split(|b| *b == b'\n').skip(1) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some(colon) = line.find(':') else { continue };
        let key = line[..colon].trim().to_ascii_lowercase();
        let value = line[colon + 1..].trim().to_string();
        if key == "content-length" {
            if let Ok(n) = value.parse::<usize>() {
                content_length = Some(n);
            }
        }
        // We forced close on the local hop; don't leak that upstream.
        if key == "connection" {
            continue;
        }
        headers.push((key, value));
    }

    let mut body = buf[header_end + 4..].to_vec();
    match content_length {
        Some(len) => {
            while body.len() < len {
                let n = stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| Error::LocalUnreachable(e.to_string()))?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..n]);
                if body.len() > MAX_RESPONSE_BYTES {
                    return Ok(oversize_response());
                }
            }
            body.truncate(len);
        }
        None => loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| Error::LocalUnreachable(e.to_string()))?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
            if body.len() > MAX_RESPONSE_BYTES {
                return Ok(oversize_response());
            }
        },
    }

    Ok(codec::encode(status, &status_text, &headers, &body))
}

/// The partial body is discarded; the caller gets a normal 502.
fn oversize_response() -> Vec<u8> {
    codec::error_response(
        502,
        "Bad Gateway",
        &Error::ResponseTooLarge(MAX_RESPONSE_BYTES / (1024 * 1024)).to_string(),
    )
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
