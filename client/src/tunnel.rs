//! Tunnel session: the persistent relay connection.
//!
//! One session owns one websocket. The lifecycle is Connecting →
//! Registering → Ready → Closed, held in a single enum value with the
//! session task as its only writer. Data frames are handled on their own
//! tasks and answered through a shared outbound channel, so responses go
//! back in completion order; the wire carries no correlation id.

use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use vortex_shared::codec;
use vortex_shared::protocol::{self, Inbound, MAX_REQUEST_BYTES};
use vortex_shared::{Error, Result};

use crate::forward;
use crate::telemetry::{self, Emitter, TrafficEvent};

/// Deadline for the websocket to open.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Deadline for the relay to acknowledge registration.
pub const REGISTER_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Session lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registering,
    Ready,
    Closed(String),
}

/// Everything one session needs, resolved by the CLI layer. Timeouts
/// default to the protocol constants; tests shrink them.
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub server_url: String,
    pub endpoint: String,
    pub local_port: u16,
    pub auth_token: Option<String>,
    pub connect_timeout: Duration,
    pub register_timeout: Duration,
    pub forward_timeout: Duration,
}

impl TunnelOptions {
    pub fn new(
        server_url: String,
        endpoint: String,
        local_port: u16,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            server_url,
            endpoint,
            local_port,
            auth_token,
            connect_timeout: CONNECT_TIMEOUT,
            register_timeout: REGISTER_TIMEOUT,
            forward_timeout: forward::LOCAL_FORWARD_TIMEOUT,
        }
    }
}

/// Drive one session to its terminal state.
///
/// `on_ready` fires once, on the Registering → Ready transition. The
/// returned future only resolves with an error: a session that reached
/// `Ready` ends when its transport does, and cancellation is the caller
/// dropping the future, which closes the one transport and disarms any
/// pending timer.
pub async fn run<F: Fn()>(opts: &TunnelOptions, emitter: &Emitter, on_ready: F) -> Result<()> {
    let mut state = SessionState::Connecting;
    let result = drive(opts, emitter, on_ready, &mut state).await;
    if let Err(err) = &result {
        transition(&mut state, SessionState::Closed(close_reason(err)));
    }
    result
}

/// The `Closed` reason reported for each terminal error.
pub fn close_reason(err: &Error) -> String {
    match err {
        Error::ConnectTimeout => "connect-timeout".to_string(),
        Error::RegistrationTimeout => "registration-timeout".to_string(),
        Error::RegistrationRejected(msg) => msg.clone(),
        Error::TransportClosed => "closed".to_string(),
        other => other.to_string(),
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    debug!("session state: {:?} -> {:?}", state, next);
    *state = next;
}

async fn drive<F: Fn()>(
    opts: &TunnelOptions,
    emitter: &Emitter,
    on_ready: F,
    state: &mut SessionState,
) -> Result<()> {
    let url = format!("{}/tunnel", opts.server_url.trim_end_matches('/'));
    debug!("connecting: {}", url);

    let (ws, _) = tokio::time::timeout(opts.connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| Error::ConnectTimeout)?
        .map_err(|e| Error::Transport(e.to_string()))?;

    transition(state, SessionState::Registering);
    let (mut write, mut read) = ws.split();

    let register = protocol::Register::new(&opts.endpoint, opts.auth_token.as_deref());
    let payload =
        serde_json::to_string(&register).map_err(|e| Error::Transport(e.to_string()))?;
    write
        .send(Message::Text(payload))
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
    debug!("sent registration for endpoint '{}'", opts.endpoint);

    // Registration phase: exactly one ack decides the session's fate.
    let deadline = tokio::time::sleep(opts.register_timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return Err(Error::RegistrationTimeout),
            msg = read.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    write
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| Error::Transport(e.to_string()))?;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    // Close before Ready reports the pending phase's reason.
                    return Err(Error::RegistrationTimeout);
                }
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                    match protocol::classify(payload_of(msg)) {
                        Inbound::Control(reply) => {
                            if let Some(message) = reply.error {
                                return Err(Error::RegistrationRejected(message));
                            }
                            if reply.ok {
                                break;
                            }
                            debug!("ignoring control frame during registration");
                        }
                        Inbound::Data(_) => {
                            debug!("ignoring data frame before registration ack");
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(Error::Transport(e.to_string())),
            },
        }
    }

    transition(state, SessionState::Ready);
    info!("registered; endpoint '{}' is live", opts.endpoint);
    on_ready();

    // Ready phase: frames in, responses out, in completion order.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    loop {
        tokio::select! {
            Some(frame) = out_rx.recv() => {
                write
                    .send(frame)
                    .await
                    .map_err(|_| Error::TransportClosed)?;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    write
                        .send(Message::Pong(data))
                        .await
                        .map_err(|_| Error::TransportClosed)?;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => return Err(Error::TransportClosed),
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                    match protocol::classify(payload_of(msg)) {
                        Inbound::Control(reply) => {
                            // Registration resolved once already; a second
                            // control frame is the relay breaking protocol.
                            let detail = reply.error.unwrap_or_else(|| {
                                "unexpected control frame after registration".to_string()
                            });
                            return Err(Error::ProtocolViolation(detail));
                        }
                        Inbound::Data(frame) => {
                            let ctx = RequestContext {
                                local_port: opts.local_port,
                                forward_timeout: opts.forward_timeout,
                                endpoint: opts.endpoint.clone(),
                                out: out_tx.clone(),
                                emitter: emitter.clone(),
                            };
                            tokio::spawn(handle_request(ctx, frame));
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("websocket error: {}", e);
                    return Err(Error::TransportClosed);
                }
            },
        }
    }
}

fn payload_of(msg: Message) -> Vec<u8> {
    match msg {
        Message::Text(text) => text.into_bytes(),
        Message::Binary(data) => data,
        _ => Vec::new(),
    }
}

/// Per-request context handed to a spawned frame handler.
struct RequestContext {
    local_port: u16,
    forward_timeout: Duration,
    endpoint: String,
    out: mpsc::UnboundedSender<Message>,
    emitter: Emitter,
}

impl RequestContext {
    /// The session may be tearing down; a dead channel is not our problem.
    fn send(&self, response: Vec<u8>) {
        let _ = self.out.send(Message::Binary(response));
    }

    fn base_event(&self, method: String, path: String, bytes_in: u64) -> TrafficEvent {
        TrafficEvent {
            id: None,
            method,
            path,
            bytes_in,
            bytes_out: 0,
            status_code: None,
            status_text: None,
            endpoint: self.endpoint.clone(),
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
}

/// Handle one inbound request frame end to end. Every frame, success or
/// failure, emits exactly one telemetry event.
async fn handle_request(ctx: RequestContext, frame: Vec<u8>) {
    let started = Instant::now();
    let bytes_in = frame.len() as u64;

    if frame.len() > MAX_REQUEST_BYTES {
        let response = codec::error_response(
            413,
            "Payload Too Large",
            &Error::RequestTooLarge(MAX_REQUEST_BYTES / (1024 * 1024)).to_string(),
        );
        let mut event = ctx.base_event(
            codec::request_method(&frame),
            codec::request_path(&frame),
            bytes_in,
        );
        event.bytes_out = response.len() as u64;
        event.status_code = Some(413);
        event.status_text = Some("Payload Too Large".to_string());
        event.duration_ms = Some(started.elapsed().as_millis() as u64);
        ctx.send(response);
        ctx.emitter.emit(event);
        return;
    }

    let Some(req) = codec::decode(&frame) else {
        let response =
            codec::error_response(400, "Bad Request", &Error::MalformedRequest.to_string());
        let mut event = ctx.base_event(
            codec::request_method(&frame),
            codec::request_path(&frame),
            bytes_in,
        );
        event.bytes_out = response.len() as u64;
        event.status_code = Some(400);
        event.status_text = Some("Bad Request".to_string());
        event.duration_ms = Some(started.elapsed().as_millis() as u64);
        ctx.send(response);
        ctx.emitter.emit(event);
        return;
    };

    debug!(
        "proxying {} {} to localhost:{}",
        req.method, req.path, ctx.local_port
    );

    let mut event = ctx.base_event(req.method.clone(), req.path.clone(), bytes_in);
    event.host = req.header("host").map(str::to_string);
    event.request_headers = Some(req.headers.clone());
    let (body, truncated) = telemetry::capture_body(&req.body);
    event.request_body = body;
    event.request_body_truncated = truncated;

    match forward::forward(&req, ctx.local_port, ctx.forward_timeout).await {
        Ok(response) => {
            event.bytes_out = response.len() as u64;
            if let Some((status, text)) = codec::response_status(&response) {
                event.status_code = Some(status);
                event.status_text = Some(text);
            }
            // A rendered response splits exactly like a request; only the
            // headers and body of the parse are meaningful here.
            if let Some(parsed) = codec::decode(&response) {
                event.response_headers = Some(parsed.headers);
                let (body, truncated) = telemetry::capture_body(&parsed.body);
                event.response_body = body;
                event.response_body_truncated = truncated;
            }
            event.duration_ms = Some(started.elapsed().as_millis() as u64);
            ctx.send(response);
        }
        Err(err) => {
            // Local failure: status stays absent, the wire gets a 502.
            warn!("local forward failed: {}", err);
            event.duration_ms = Some(started.elapsed().as_millis() as u64);
            ctx.send(codec::error_response(502, "Bad Gateway", &err.to_string()));
        }
    }
    ctx.emitter.emit(event);
}
