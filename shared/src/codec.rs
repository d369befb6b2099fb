//! HTTP/1.1 message codec.
//!
//! Tunnel frames carry whole HTTP messages. The codec turns raw request
//! bytes into a structured form and renders responses back to bytes.
//! Message boundaries come from the transport frame, never from a
//! content-length header.

/// A request parsed out of a single tunnel frame.
///
/// Headers are insertion-ordered with lower-cased keys; a duplicate key
/// overwrites the earlier value in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ParsedRequest {
    /// Look up a header by its lower-cased key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a raw HTTP request frame.
///
/// The header/body separator is the first `\r\n\r\n`, falling back to the
/// first `\n\n`; header lines are split with the matching line ending.
/// Returns `None` only when no separator exists anywhere in the buffer.
pub fn decode(buf: &[u8]) -> Option<ParsedRequest> {
    let (sep, sep_len, line_sep) = match find(buf, b"\r\n\r\n") {
        Some(pos) => (pos, 4, "\r\n"),
        None => match find(buf, b"\n\n") {
            Some(pos) => (pos, 2, "\n"),
            None => return None,
        },
    };

    let head = String::from_utf8_lossy(&buf[..sep]);
    let body = buf[sep + sep_len..].to_vec();

    let mut lines = head.split(line_sep);
    let first_line = lines.next().unwrap_or("");
    let mut parts = first_line.split(' ');
    let method = match parts.next() {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => "GET".to_string(),
    };
    let path = match parts.next() {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => "/".to_string(),
    };

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        // Lines without a colon are skipped, not fatal.
        let Some(colon) = line.find(':') else { continue };
        let key = line[..colon].trim().to_ascii_lowercase();
        let value = line[colon + 1..].trim().to_string();
        if let Some(slot) = headers.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            headers.push((key, value));
        }
    }

    Some(ParsedRequest {
        method,
        path,
        headers,
        body,
    })
}

/// Render a complete response message.
///
/// One `key: value` line per entry; multi-valued entries are expected
/// pre-joined with `", "`. The body goes out verbatim, binary included.
pub fn encode(status: u16, status_text: &str, headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {} {}\r\n", status, status_text);
    for (key, value) in headers {
        head.push_str(key);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

/// Render a synthesized plain-text error response.
pub fn error_response(status: u16, status_text: &str, message: &str) -> Vec<u8> {
    encode(
        status,
        status_text,
        &[("content-type".to_string(), "text/plain".to_string())],
        message.as_bytes(),
    )
}

/// First token of the request line; `"?"` when the frame has none.
///
/// Lenient on purpose: used to label frames that failed full decoding.
pub fn request_method(buf: &[u8]) -> String {
    match first_line(buf).split(' ').next() {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => "?".to_string(),
    }
}

/// Second token of the request line; `"/"` when absent.
pub fn request_path(buf: &[u8]) -> String {
    match first_line(buf).split(' ').nth(1) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => "/".to_string(),
    }
}

/// Status code and reason phrase from a response status line.
pub fn response_status(buf: &[u8]) -> Option<(u16, String)> {
    let line = first_line(buf);
    let mut parts = line.split(' ');
    let code = parts.next()?;
    if !code.starts_with("HTTP/") {
        return None;
    }
    let status = parts.next()?.parse::<u16>().ok()?;
    let text = parts.collect::<Vec<_>>().join(" ");
    Some((status, text))
}

fn first_line(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == b'\n').unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end])
        .trim_end_matches('\r')
        .to_string()
}

fn find(buf: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > buf.len() {
        return None;
    }
    buf.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn decode_basic_request() {
        let raw = b"POST /api/items HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/json\r\n\r\n{\"a\":1}";
        let req = decode(raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/items");
        assert_eq!(req.header("host"), Some("example.com"));
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.body, b"{\"a\":1}");
    }

    #[test]
    fn decode_requires_separator() {
        assert!(decode(b"GET / HTTP/1.1\r\nHost: x\r\n").is_none());
        assert!(decode(b"").is_none());
    }

    #[test]
    fn decode_lf_only_framing() {
        let req = decode(b"GET /x HTTP/1.0\nhost: y\n\nbody").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/x");
        assert_eq!(req.header("host"), Some("y"));
        assert_eq!(req.body, b"body");
    }

    #[test]
    fn decode_defaults_method_and_path() {
        let req = decode(b"\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/");
        assert!(req.headers.is_empty());
    }

    #[test]
    fn decode_skips_lines_without_colon() {
        let req = decode(b"GET / HTTP/1.1\r\ngarbage line\r\nhost: x\r\n\r\n").unwrap();
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("host"), Some("x"));
    }

    #[test]
    fn decode_duplicate_header_last_write_wins() {
        let req = decode(b"GET / HTTP/1.1\r\nX-Tag: one\r\nx-tag: two\r\n\r\n").unwrap();
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("x-tag"), Some("two"));
    }

    #[test]
    fn decode_splits_at_first_separator() {
        // A separator inside the body stays in the body.
        let req = decode(b"GET / HTTP/1.1\r\n\r\nfirst\r\n\r\nsecond").unwrap();
        assert_eq!(req.body, b"first\r\n\r\nsecond");
    }

    #[test]
    fn encode_decode_round_trip() {
        let hdrs = headers(&[
            ("content-type", "text/html"),
            ("x-request-id", "abc-123"),
            ("vary", "accept, accept-encoding"),
        ]);
        let body: Vec<u8> = (0u8..=255).collect();
        let rendered = encode(200, "OK", &hdrs, &body);
        let parsed = decode(&rendered).unwrap();
        assert_eq!(parsed.headers, hdrs);
        assert_eq!(parsed.body, body);
    }

    #[test]
    fn encode_is_binary_safe() {
        let body = vec![0u8, 159, 146, 150, b'\r', b'\n'];
        let rendered = encode(200, "OK", &[], &body);
        assert!(rendered.ends_with(&body));
        assert!(rendered.starts_with(b"HTTP/1.1 200 OK\r\n\r\n"));
    }

    #[test]
    fn error_response_shape() {
        let resp = error_response(502, "Bad Gateway", "upstream died");
        let text = String::from_utf8_lossy(&resp);
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(text.contains("content-type: text/plain\r\n"));
        assert!(text.ends_with("upstream died"));
    }

    #[test]
    fn lenient_request_line_helpers() {
        assert_eq!(request_method(b"DELETE /v1/x HTTP/1.1\r\n..."), "DELETE");
        assert_eq!(request_path(b"DELETE /v1/x HTTP/1.1\r\n..."), "/v1/x");
        assert_eq!(request_method(b""), "?");
        assert_eq!(request_path(b"GET"), "/");
    }

    #[test]
    fn response_status_parsing() {
        let (code, text) = response_status(b"HTTP/1.1 404 Not Found\r\n\r\n").unwrap();
        assert_eq!(code, 404);
        assert_eq!(text, "Not Found");
        assert!(response_status(b"not a status line").is_none());
    }
}
