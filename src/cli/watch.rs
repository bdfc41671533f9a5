//! `turnstream watch` - follow a session from the terminal

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;
use turnstream_replay::{drain_short, HttpTraceSource, LiveStream, Relay, TraceSource};

use super::WatchMode;
use crate::server::config::RelayConfig;

/// Resolved `watch` arguments
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub backend_url: String,
    pub mode: WatchMode,
    pub once: bool,
}

/// Print the session to stdout until its terminal event
pub async fn run(session_id: &str, options: &WatchOptions, relay: &RelayConfig) -> Result<()> {
    let source = HttpTraceSource::new(&options.backend_url, relay.live().connect_timeout())
        .context("Failed to create trace client")?;

    if options.once {
        let outputs = drain_short(
            &source,
            session_id,
            relay.short_poll_tries,
            relay.trace_poll(),
        )
        .await;
        if outputs.is_empty() {
            println!("(no events yet for session {session_id})");
        }
        for out in outputs {
            print!("{out}");
        }
        return Ok(());
    }

    let source: Arc<dyn TraceSource> = Arc::new(source);
    let mut follower = Relay::new(source, session_id).with_trace_poll(relay.trace_poll());
    if options.mode == WatchMode::Sse {
        let live = LiveStream::new(&options.backend_url, session_id, &relay.live())
            .context("Failed to create stream client")?;
        follower = follower.with_live(live);
    }

    let stdout = std::io::stdout();
    let summary = follower
        .follow(|out| {
            let mut handle = stdout.lock();
            // A closed stdout only ends the output, not the follow.
            let _ = handle.write_all(out.as_bytes());
            let _ = handle.flush();
        })
        .await;
    debug!(?summary, "Watch finished");
    Ok(())
}
