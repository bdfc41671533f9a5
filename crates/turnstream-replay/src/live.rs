//! LiveStream - SSE consumer for `GET /stream/{session_id}`
//!
//! Reads `data:` frames off a `reqwest` byte stream, ignores comment frames
//! (heartbeats), and renders each event as it arrives. The connection has a
//! connect timeout and an idle timeout; running into either is not an error
//! for the caller, just a signal to continue from the durable trace.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;
use turnstream_core::{format_event, Event};

use crate::error::{Error, Result};

/// Live connection timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Seconds allowed to establish the connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds without a rendered event before giving up on the stream
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    12
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl LiveConfig {
    /// Connect timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Idle timeout
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// What a live session delivered before it ended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveOutcome {
    /// A terminal `end` event was received
    pub seen_end: bool,
    /// At least one event rendered to output
    pub any_event: bool,
    /// Events parsed off the stream, rendered or not
    pub events_received: usize,
    /// Newest event parsed off the stream
    pub last_event: Option<Event>,
}

/// SSE client bound to one session
#[derive(Debug, Clone)]
pub struct LiveStream {
    client: reqwest::Client,
    url: String,
    idle_timeout: Duration,
}

impl LiveStream {
    /// Client for `{base_url}/stream/{session_id}`
    pub fn new(base_url: &str, session_id: &str, config: &LiveConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/stream/{}", base_url.trim_end_matches('/'), session_id),
            idle_timeout: config.idle_timeout(),
        })
    }

    /// Stream URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Consume the stream, handing each rendered event to `on_output`.
    ///
    /// Returns when a terminal event arrives, the server closes the stream,
    /// the connection drops, or nothing renders for the idle timeout. Only a
    /// failure to connect is an error.
    pub async fn run<F>(&self, mut on_output: F) -> Result<LiveOutcome>
    where
        F: FnMut(String) + Send,
    {
        let resp = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Status {
                status: resp.status().as_u16(),
                url: self.url.clone(),
            });
        }

        let mut body = resp.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut outcome = LiveOutcome::default();
        let mut last_event = Instant::now();

        loop {
            let remaining = self.idle_timeout.saturating_sub(last_event.elapsed());
            let chunk = match tokio::time::timeout(remaining, body.next()).await {
                Err(_) => {
                    debug!(url = %self.url, "Live stream idle");
                    break;
                }
                Ok(None) => {
                    debug!(url = %self.url, "Live stream closed by server");
                    break;
                }
                Ok(Some(Err(e))) => {
                    debug!(url = %self.url, error = %e, "Live stream dropped");
                    break;
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            lines.push(&chunk);
            while let Some(line) = lines.next_line() {
                let Some(event) = parse_frame_line(&line) else {
                    continue;
                };
                outcome.events_received += 1;
                if event.is_terminal() {
                    outcome.seen_end = true;
                }
                if let Some(out) = format_event(&event) {
                    outcome.any_event = true;
                    last_event = Instant::now();
                    on_output(out);
                }
                outcome.last_event = Some(event);
                if outcome.seen_end {
                    return Ok(outcome);
                }
            }
        }
        Ok(outcome)
    }
}

/// Event carried by one SSE line, if it is a well-formed `data:` line
fn parse_frame_line(line: &str) -> Option<Event> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim_start();
    match Event::from_json_line(data) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "Skipping unparseable frame");
            None
        }
    }
}

/// Splits a byte stream into lines without breaking multi-byte characters
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}
