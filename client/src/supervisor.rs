//! Reconnection supervisor: bounded retry around one tunnel session.

use std::time::Duration;

use tracing::warn;

use vortex_shared::Result;

use crate::telemetry::Emitter;
use crate::tunnel::{self, TunnelOptions};

/// Retries after the first attempt, so three attempts total.
pub const MAX_RETRIES: u32 = 2;

/// Attempt `n` waits `BASE_DELAY * 2^n` before reconnecting.
pub const BASE_DELAY: Duration = Duration::from_millis(2_000);

/// Drive sessions until one fails terminally.
///
/// Only resolves with an error: a session that reached `Ready` ends in a
/// terminal failure by definition, and cancellation is the caller dropping
/// this future, which tears down the active transport and any pending
/// backoff timer with it.
pub async fn run<F: Fn()>(opts: &TunnelOptions, emitter: &Emitter, on_ready: F) -> Result<()> {
    run_with_backoff(opts, emitter, on_ready, BASE_DELAY).await
}

async fn run_with_backoff<F: Fn()>(
    opts: &TunnelOptions,
    emitter: &Emitter,
    on_ready: F,
    base_delay: Duration,
) -> Result<()> {
    let mut attempt: u32 = 0;
    loop {
        match tunnel::run(opts, emitter, &on_ready).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                let delay = base_delay * 2u32.pow(attempt);
                warn!(
                    "connection failed: {}. retrying in {:.1}s...",
                    err,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
