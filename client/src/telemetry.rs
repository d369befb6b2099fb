//! Traffic telemetry producer.
//!
//! Every forwarded request becomes one event, delivered best-effort to the
//! local console. Delivery runs on a detached task over its own HTTP
//! connection and can never block or fail the tunnel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use vortex_shared::protocol::BODY_CAPTURE_BYTES;

/// Loopback console port.
pub const CONSOLE_PORT: u16 = 3847;

/// One forwarded request as the console sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficEvent {
    /// Assigned by the console on ingest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub bytes_in: u64,
    #[serde(default)]
    pub bytes_out: u64,
    /// Absent when the local forward failed outright.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "clientIP", default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Vec<(String, String)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body_truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Vec<(String, String)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body_truncated: Option<bool>,
}

/// Fire-and-forget event delivery to the console ingest endpoint.
#[derive(Debug, Clone)]
pub struct Emitter {
    client: reqwest::Client,
    url: String,
}

impl Emitter {
    pub fn new() -> Self {
        Self::with_url(format!("http://127.0.0.1:{}/api/traffic", CONSOLE_PORT))
    }

    pub fn with_url(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Post the event on a detached task. A console that is not running,
    /// slow, or broken is not an error anybody hears about.
    pub fn emit(&self, event: TrafficEvent) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let sent = client
                .post(&url)
                .timeout(Duration::from_secs(2))
                .json(&event)
                .send()
                .await;
            if let Err(err) = sent {
                debug!("traffic event dropped: {}", err);
            }
        });
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lossy text capture of a body, cut at the capture limit.
pub fn capture_body(body: &[u8]) -> (Option<String>, Option<bool>) {
    if body.is_empty() {
        return (None, None);
    }
    let truncated = body.len() > BODY_CAPTURE_BYTES;
    let end = body.len().min(BODY_CAPTURE_BYTES);
    (
        Some(String::from_utf8_lossy(&body[..end]).into_owned()),
        Some(truncated),
    )
}
