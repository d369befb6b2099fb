//! Control-plane messages and wire limits for the tunnel protocol.
//!
//! The relay speaks two kinds of frames over one websocket: structured
//! JSON control messages and raw HTTP bytes. Classification is by content,
//! not by the websocket opcode.

use serde::Serialize;

/// Largest request frame accepted from the relay (10 MiB).
pub const MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// Largest local response body forwarded back through the tunnel (10 MiB).
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Captured request/response bodies are cut here before telemetry.
pub const BODY_CAPTURE_BYTES: usize = 32 * 1024;

/// Registration, sent once per connection immediately after open.
#[derive(Debug, Clone, Serialize)]
pub struct Register<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub endpoint: &'a str,
    #[serde(rename = "authToken", skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<&'a str>,
}

impl<'a> Register<'a> {
    pub fn new(endpoint: &'a str, auth_token: Option<&'a str>) -> Self {
        Self {
            kind: "register",
            endpoint,
            auth_token,
        }
    }
}

/// A structured reply from the relay: `{ok:true}` or `{error:"..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    pub ok: bool,
    pub error: Option<String>,
}

/// One inbound frame, classified by content.
#[derive(Debug)]
pub enum Inbound {
    Control(ControlReply),
    Data(Vec<u8>),
}

/// Classify an inbound frame.
///
/// Anything that parses as a JSON object is control; every other payload
/// is binary request data, whatever its transport framing bit said.
pub fn classify(payload: Vec<u8>) -> Inbound {
    if payload.first() == Some(&b'{') {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&payload) {
            if value.is_object() {
                let error = value
                    .get("error")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned);
                let ok = value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
                return Inbound::Control(ControlReply { ok, error });
            }
        }
    }
    Inbound::Data(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_wire_shape() {
        let msg = Register::new("happy-blue-frog", Some("s3cret"));
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"register","endpoint":"happy-blue-frog","authToken":"s3cret"}"#
        );
    }

    #[test]
    fn register_omits_absent_token() {
        let msg = Register::new("demo", None);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("authToken"));
    }

    #[test]
    fn classify_ack() {
        match classify(br#"{"ok":true}"#.to_vec()) {
            Inbound::Control(reply) => {
                assert!(reply.ok);
                assert!(reply.error.is_none());
            }
            Inbound::Data(_) => panic!("ack classified as data"),
        }
    }

    #[test]
    fn classify_rejection() {
        match classify(br#"{"error":"invalid auth token"}"#.to_vec()) {
            Inbound::Control(reply) => {
                assert!(!reply.ok);
                assert_eq!(reply.error.as_deref(), Some("invalid auth token"));
            }
            Inbound::Data(_) => panic!("error classified as data"),
        }
    }

    #[test]
    fn classify_http_bytes_as_data() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();
        assert!(matches!(classify(raw), Inbound::Data(_)));
    }

    #[test]
    fn classify_malformed_json_as_data() {
        // A brace-leading frame that is not valid JSON is request data.
        assert!(matches!(classify(b"{not json".to_vec()), Inbound::Data(_)));
        // So is a JSON value that is not an object.
        assert!(matches!(classify(b"[1,2]".to_vec()), Inbound::Data(_)));
    }
}
