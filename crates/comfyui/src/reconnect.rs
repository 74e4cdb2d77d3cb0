//! Backoff for re-establishing the engine's event stream.
//!
//! The engine task calls [`reconnect_loop`] whenever the stream cannot be
//! opened or drops. Delays grow geometrically up to a ceiling; a
//! cancelled token ends the loop at the next await point.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor applied after every failed attempt.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Delay schedule for one outage.
#[derive(Debug)]
pub struct Backoff<'a> {
    config: &'a ReconnectConfig,
    current: Duration,
    attempts: u32,
}

impl<'a> Backoff<'a> {
    pub fn new(config: &'a ReconnectConfig) -> Self {
        Self {
            config,
            current: config.initial_delay.min(config.max_delay),
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = self.current.as_secs_f64() * self.config.multiplier;
        self.current = Duration::from_secs_f64(grown.min(self.config.max_delay.as_secs_f64()));
        self.attempts += 1;
        delay
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Retry `connect` with backoff until it succeeds or `cancel` fires.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    loop {
        let delay = backoff.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        let attempt = backoff.attempts();
        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = connect() => match result {
                Ok(value) => {
                    tracing::info!(attempt, "Engine event stream restored");
                    return Some(value);
                }
                Err(e) => {
                    tracing::warn!(attempt, next_delay_ms = backoff.current.as_millis() as u64, error = %e, "Engine reconnect failed");
                }
            }
        }
    }
}

/// Reopen the engine WebSocket. `None` means the engine is shutting down.
pub async fn reconnect_loop(
    client: &ComfyUIClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<ComfyUIConnection> {
    tracing::info!(ws_url = client.ws_url(), "Reconnecting to ComfyUI");
    let conn = retry_with_backoff(config, cancel, || client.connect()).await;
    if conn.is_none() {
        tracing::info!(ws_url = client.ws_url(), "Reconnect abandoned on shutdown");
    }
    conn
}
