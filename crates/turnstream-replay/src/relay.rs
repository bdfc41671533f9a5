//! Relay - follow a session live, then from the durable trace
//!
//! The live stream is tried first. If it cannot be opened, goes idle, or
//! drops before the terminal event, the relay prints one notice and tails the
//! trace from the last event the live stream delivered.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::live::LiveStream;
use crate::source::TraceSource;
use crate::tail::TraceTail;

/// Notice emitted when the relay switches to the trace
pub const FALLBACK_NOTICE: &str =
    "(live stream idle or disconnected before the end; falling back to trace polling...)\n\n";

type EventHook = Arc<dyn Fn() + Send + Sync>;

/// How a relay went
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    /// The live stream was opened
    pub used_live: bool,
    /// The live stream delivered the terminal event
    pub live_complete: bool,
    /// The trace tail took over
    pub fell_back: bool,
    /// Outputs handed to the caller, notice included
    pub outputs: usize,
}

/// Live-then-trace follower for one session
pub struct Relay {
    session_id: String,
    live: Option<LiveStream>,
    source: Arc<dyn TraceSource>,
    trace_poll: Duration,
    on_event: Option<EventHook>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("session_id", &self.session_id)
            .field("live", &self.live.as_ref().map(LiveStream::url))
            .field("trace_poll", &self.trace_poll)
            .finish()
    }
}

impl Relay {
    /// Trace-only relay; add a live stream with [`Relay::with_live`]
    #[must_use]
    pub fn new(source: Arc<dyn TraceSource>, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            live: None,
            source,
            trace_poll: Duration::from_secs(1),
            on_event: None,
        }
    }

    /// Try `live` before the trace
    #[must_use]
    pub fn with_live(mut self, live: LiveStream) -> Self {
        self.live = Some(live);
        self
    }

    /// Trace poll interval
    #[must_use]
    pub fn with_trace_poll(mut self, poll: Duration) -> Self {
        self.trace_poll = poll;
        self
    }

    /// Call `hook` for every event output, live or replayed
    #[must_use]
    pub fn on_event(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(hook));
        self
    }

    /// Follow the session to its end, handing outputs to `on_output`
    pub async fn follow<F>(self, mut on_output: F) -> RelaySummary
    where
        F: FnMut(String) + Send,
    {
        let mut summary = RelaySummary::default();
        let mut offset = 0;
        let mut resume_after = None;

        if let Some(live) = &self.live {
            let hook = self.on_event.clone();
            let result = live
                .run(|out| {
                    if let Some(hook) = &hook {
                        hook();
                    }
                    summary.outputs += 1;
                    on_output(out);
                })
                .await;
            match result {
                Ok(outcome) => {
                    summary.used_live = true;
                    summary.live_complete = outcome.seen_end;
                    offset = outcome.events_received;
                    resume_after = outcome.last_event;
                }
                Err(e) => debug!(session_id = %self.session_id, error = %e, "Live stream unavailable"),
            }
        }

        if summary.live_complete {
            return summary;
        }

        if self.live.is_some() {
            info!(session_id = %self.session_id, offset, "Switching to trace polling");
            summary.outputs += 1;
            on_output(FALLBACK_NOTICE.to_string());
        }
        summary.fell_back = true;

        let mut tail = TraceTail::new(self.source.clone(), self.session_id.clone(), self.trace_poll)
            .from_offset(offset);
        if let Some(event) = resume_after {
            tail = tail.after(event);
        }
        if let Some(hook) = self.on_event.clone() {
            tail = tail.on_output(move || hook());
        }
        while let Some(out) = tail.next_chunk().await {
            summary.outputs += 1;
            on_output(out);
        }
        summary
    }
}
