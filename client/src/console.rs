//! Local operator console.
//!
//! Loopback-only axum server. It persists configuration edits and retains
//! a bounded, newest-first buffer of traffic events, rebroadcast live to
//! any number of websocket observers. The tunnel client feeds it through
//! `POST /api/traffic`; nothing here ever reaches back into the tunnel.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::config::{self, ConfigPatch};
use crate::telemetry::TrafficEvent;

/// Events retained for late-joining observers.
const MAX_TRAFFIC_EVENTS: usize = 200;

const FALLBACK_PAGE: &str = r#"<!DOCTYPE html><html><head><meta charset="utf-8"><title>Vortex</title></head><body style="font-family:system-ui;background:#0a0a0a;color:#e5e5e5;padding:2rem;max-width:640px;margin:0 auto">
  <h1>Vortex</h1>
  <p>Console API is running. Traffic: <code>GET /api/traffic</code>, live feed: <code>GET /ws/traffic</code>.</p>
</body></html>"#;

/// Shared console state. The ingest handler is the only writer of the
/// event buffer; observers consume a broadcast of their own.
#[derive(Clone)]
pub struct ConsoleState {
    events: Arc<Mutex<VecDeque<TrafficEvent>>>,
    tx: broadcast::Sender<TrafficEvent>,
    next_id: Arc<AtomicU64>,
    config_path: PathBuf,
}

impl ConsoleState {
    pub fn new() -> Self {
        Self::with_config_path(config::config_path())
    }

    pub fn with_config_path(config_path: PathBuf) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_TRAFFIC_EVENTS))),
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            config_path,
        }
    }

    /// Ingest one event: assign its id, retain newest-first, rebroadcast.
    async fn record(&self, mut event: TrafficEvent) {
        event.id = Some(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut events = self.events.lock().await;
            if events.len() >= MAX_TRAFFIC_EVENTS {
                events.pop_back();
            }
            events.push_front(event.clone());
        }
        // No observers is fine.
        let _ = self.tx.send(event);
    }

    async fn snapshot(&self) -> Vec<TrafficEvent> {
        self.events.lock().await.iter().cloned().collect()
    }
}

impl Default for ConsoleState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn router(state: ConsoleState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/traffic", get(get_traffic).post(post_traffic))
        .route("/ws/traffic", get(ws_traffic))
        .with_state(state)
}

/// Serve the console on the loopback interface until the task is dropped.
pub async fn serve(state: ConsoleState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("console: http://127.0.0.1:{}", port);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index_handler() -> impl IntoResponse {
    Html(FALLBACK_PAGE)
}

async fn get_config(State(state): State<ConsoleState>) -> impl IntoResponse {
    let cfg = config::load_from(&state.config_path);
    Json(json!({
        "domain": cfg.tunnel_domain().unwrap_or_default(),
        "domains": cfg.domains(),
        "authToken": cfg.auth_token.clone().unwrap_or_default(),
        "endpoints": cfg.endpoints,
    }))
}

async fn put_config(
    State(state): State<ConsoleState>,
    Json(patch): Json<ConfigPatch>,
) -> impl IntoResponse {
    let mut cfg = config::load_from(&state.config_path);
    cfg.apply(patch);
    match config::save_to(&state.config_path, &cfg) {
        Ok(()) => Json(cfg).into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn get_traffic(State(state): State<ConsoleState>) -> impl IntoResponse {
    Json(state.snapshot().await)
}

async fn post_traffic(
    State(state): State<ConsoleState>,
    Json(event): Json<TrafficEvent>,
) -> impl IntoResponse {
    state.record(event).await;
    Json(json!({"ok": true}))
}

async fn ws_traffic(State(state): State<ConsoleState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observer_loop(socket, state))
}

/// One live observer: the full buffer as an `init` message first, then
/// every event as it arrives.
async fn observer_loop(socket: WebSocket, state: ConsoleState) {
    // Subscribe before the snapshot so no event can fall between them.
    let mut rx = state.tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let init = json!({"type": "init", "events": state.snapshot().await});
    if sender.send(WsMessage::Text(init.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if sender.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("observer lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = receiver.next() => {
                if matches!(msg, None | Some(Err(_)) | Some(Ok(WsMessage::Close(_)))) {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use chrono::Utc;

    fn event(method: &str, path: &str) -> TrafficEvent {
        TrafficEvent {
            id: None,
            method: method.to_string(),
            path: path.to_string(),
            bytes_in: 1,
            bytes_out: 2,
            status_code: Some(200),
            status_text: Some("OK".to_string()),
            endpoint: "happy-blue-frog".to_string(),
            timestamp: Utc::now(),
            client_ip: None,
            host: None,
            duration_ms: None,
            request_headers: None,
            request_body: None,
            request_body_truncated: None,
            response_headers: None,
            response_body: None,
            response_body_truncated: None,
        }
    }

    async fn spawn_console(state: ConsoleState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn temp_config_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("vortex-console-test-{}-{}", std::process::id(), tag))
            .join("config.json")
    }

    #[tokio::test]
    async fn buffer_keeps_the_newest_200() {
        let state = ConsoleState::with_config_path(temp_config_path("cap"));
        let base = spawn_console(state).await;
        let client = reqwest::Client::new();

        for i in 0..205 {
            client
                .post(format!("{}/api/traffic", base))
                .json(&event("GET", &format!("/{}", i)))
                .send()
                .await
                .unwrap();
        }

        let events: Vec<TrafficEvent> = client
            .get(format!("{}/api/traffic", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(events.len(), 200);
        // Newest first; the first five ingested are gone.
        assert_eq!(events.first().unwrap().id, Some(205));
        assert_eq!(events.first().unwrap().path, "/204");
        assert_eq!(events.last().unwrap().id, Some(6));
        assert_eq!(events.last().unwrap().path, "/5");
    }

    #[tokio::test]
    async fn observer_gets_init_before_live_events() {
        let state = ConsoleState::with_config_path(temp_config_path("ws"));
        let base = spawn_console(state).await;
        let client = reqwest::Client::new();

        for path in ["/a", "/b"] {
            client
                .post(format!("{}/api/traffic", base))
                .json(&event("GET", path))
                .send()
                .await
                .unwrap();
        }

        let ws_url = format!("{}/ws/traffic", base.replace("http://", "ws://"));
        let (mut ws, _) = tokio_tungstenite::connect_async(ws_url.as_str()).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let init: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(init["type"], "init");
        assert_eq!(init["events"].as_array().unwrap().len(), 2);

        client
            .post(format!("{}/api/traffic", base))
            .json(&event("POST", "/live"))
            .send()
            .await
            .unwrap();

        let second = ws.next().await.unwrap().unwrap();
        let live: serde_json::Value = serde_json::from_str(second.to_text().unwrap()).unwrap();
        assert_eq!(live["path"], "/live");
        assert_eq!(live["id"], 3);
    }

    #[tokio::test]
    async fn config_round_trips_through_the_api() {
        let path = temp_config_path("cfg");
        let state = ConsoleState::with_config_path(path.clone());
        let base = spawn_console(state).await;
        let client = reqwest::Client::new();

        let resp = client
            .put(format!("{}/api/config", base))
            .json(&json!({"domain": "me.vortex.sh", "authToken": "s3cret"}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let view: serde_json::Value = client
            .get(format!("{}/api/config", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["domain"], "me.vortex.sh");
        assert_eq!(view["authToken"], "s3cret");

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
