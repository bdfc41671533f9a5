//! TraceTail - pull-based replay of a session's durable log
//!
//! The tail re-reads the whole trace object every poll and resumes after the
//! last event it consumed. The object is a bounded window over the session,
//! so its first line moves forward once the session outgrows the bus log
//! capacity; the tail finds its last event in the new window, or, when that
//! event has been trimmed away, resumes at the first newer one. It keeps
//! going until it sees a terminal `end` event; a trace that does not exist
//! yet is simply polled again.
//!
//! Read path per poll:
//! 1. proxy fetch
//! 2. on a proxy failure other than "not found", resolve the direct URL
//!    (once, then cached) and read from it for the rest of the tail
//! 3. a failure to resolve or read the direct URL ends the tail with one
//!    human-readable error line

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{debug, warn};
use turnstream_core::{format_event, Event};

use crate::error::Result;
use crate::source::TraceSource;

/// Lines read by a short poll
pub const SHORT_POLL_LINES: usize = 50;

type OutputHook = Arc<dyn Fn() + Send + Sync>;

/// Line-offset tail over one session's trace
pub struct TraceTail {
    source: Arc<dyn TraceSource>,
    session_id: String,
    poll: Duration,
    offset: usize,
    last: Option<Event>,
    skipped: usize,
    use_proxy: bool,
    direct_url: Option<String>,
    pending: VecDeque<String>,
    finished: bool,
    on_output: Option<OutputHook>,
}

impl std::fmt::Debug for TraceTail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceTail")
            .field("session_id", &self.session_id)
            .field("offset", &self.offset)
            .field("use_proxy", &self.use_proxy)
            .field("finished", &self.finished)
            .finish()
    }
}

enum Fetched {
    Body(String),
    NotYet,
}

impl TraceTail {
    /// Tail `session_id` from the first line, polling every `poll`
    #[must_use]
    pub fn new(source: Arc<dyn TraceSource>, session_id: impl Into<String>, poll: Duration) -> Self {
        Self {
            source,
            session_id: session_id.into(),
            poll,
            offset: 0,
            last: None,
            skipped: 0,
            use_proxy: true,
            direct_url: None,
            pending: VecDeque::new(),
            finished: false,
            on_output: None,
        }
    }

    /// Start after `offset` lines.
    ///
    /// Without [`TraceTail::after`] the offset is all the tail knows, so it
    /// only holds while the trace still starts at the session's first event.
    #[must_use]
    pub fn from_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Resume after `event`, the last one the caller already has
    #[must_use]
    pub fn after(mut self, event: Event) -> Self {
        self.last = Some(event);
        self
    }

    /// Call `hook` once per yielded output
    #[must_use]
    pub fn on_output(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_output = Some(Arc::new(hook));
        self
    }

    /// Lines consumed so far, counting any skipped through `from_offset`
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether a terminal event or a fatal error has been seen
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished && self.pending.is_empty()
    }

    /// Next formatted output, waiting and polling as needed.
    ///
    /// Returns `None` once the tail is finished.
    pub async fn next_chunk(&mut self) -> Option<String> {
        loop {
            if let Some(out) = self.pending.pop_front() {
                if let Some(hook) = &self.on_output {
                    hook();
                }
                return Some(out);
            }
            if self.finished {
                return None;
            }

            match self.fetch().await {
                Ok(Fetched::Body(body)) => self.ingest(&body),
                Ok(Fetched::NotYet) => {}
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "Trace unavailable; giving up");
                    self.finished = true;
                    self.pending.push_back(format!(
                        "Could not read the trace for session {}: {e}\n",
                        self.session_id
                    ));
                    continue;
                }
            }

            if self.pending.is_empty() && !self.finished {
                tokio::time::sleep(self.poll).await;
            }
        }
    }

    async fn fetch(&mut self) -> Result<Fetched> {
        if self.use_proxy {
            match self.source.fetch_proxy(&self.session_id).await {
                Ok(body) => return Ok(Fetched::Body(body)),
                Err(e) if e.is_not_found() => return Ok(Fetched::NotYet),
                Err(e) => {
                    debug!(session_id = %self.session_id, error = %e, "Proxy read failed; switching to direct URL");
                    self.use_proxy = false;
                }
            }
        }

        let url = if let Some(url) = self.direct_url.clone() {
            url
        } else {
            let url = self.source.resolve_direct_url(&self.session_id).await?;
            self.direct_url = Some(url.clone());
            url
        };

        match self.source.fetch_direct(&url).await {
            Ok(body) => Ok(Fetched::Body(body)),
            Err(e) if e.is_not_found() => Ok(Fetched::NotYet),
            Err(e) => Err(e),
        }
    }

    fn ingest(&mut self, body: &str) {
        let lines: Vec<&str> = body.lines().collect();
        let Some(start) = self.resume_index(&lines) else {
            debug!(
                session_id = %self.session_id,
                lines = lines.len(),
                offset = self.offset,
                "Trace is shorter than the tail offset"
            );
            return;
        };

        for (index, line) in lines.iter().enumerate().skip(start) {
            self.offset += 1;
            let Some(event) = parse_line(&self.session_id, index, line) else {
                self.skipped += 1;
                continue;
            };
            if let Some(out) = format_event(&event) {
                self.pending.push_back(out);
            }
            let terminal = event.is_terminal();
            self.last = Some(event);
            self.skipped = 0;
            if terminal {
                debug!(session_id = %self.session_id, "Terminal event reached");
                self.finished = true;
                return;
            }
        }
    }

    /// Index of the first line not consumed yet.
    ///
    /// Scans back from the end for the last consumed event. Timestamps are
    /// strictly increasing within a session, so the scan stops at the first
    /// older event; if the last event is gone, every strictly newer line is
    /// unread.
    fn resume_index(&self, lines: &[&str]) -> Option<usize> {
        let Some(last) = &self.last else {
            return (self.offset <= lines.len()).then_some(self.offset);
        };

        let mut first_newer = lines.len();
        for (index, line) in lines.iter().enumerate().rev() {
            let Ok(event) = Event::from_json_line(line) else {
                continue;
            };
            if event.timestamp > last.timestamp {
                first_newer = index;
                continue;
            }
            if event == *last {
                return Some((index + 1 + self.skipped).min(lines.len()));
            }
            if event.timestamp < last.timestamp {
                break;
            }
        }
        if first_newer == 0 {
            debug!(session_id = %self.session_id, "Last consumed event was trimmed from the trace");
        }
        Some(first_newer)
    }

    /// Turn the tail into a `Stream` of outputs
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        futures::stream::unfold(self, |mut tail| async move {
            let out = tail.next_chunk().await?;
            Some((out, tail))
        })
    }
}

fn parse_line(session_id: &str, index: usize, line: &str) -> Option<Event> {
    if line.trim().is_empty() {
        return None;
    }
    match Event::from_json_line(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(session_id, line = index + 1, error = %e, "Skipping malformed trace line");
            None
        }
    }
}

/// Non-streaming short poll.
///
/// Tries up to `tries` times, `poll` apart, and returns the formatted
/// outputs of the first `SHORT_POLL_LINES` lines as soon as there are any.
/// Failures are treated like an empty trace.
pub async fn drain_short(
    source: &dyn TraceSource,
    session_id: &str,
    tries: usize,
    poll: Duration,
) -> Vec<String> {
    let tries = tries.max(1);
    for attempt in 1..=tries {
        match fetch_once(source, session_id).await {
            Ok(body) => {
                let outputs: Vec<String> = body
                    .lines()
                    .take(SHORT_POLL_LINES)
                    .enumerate()
                    .filter_map(|(i, line)| parse_line(session_id, i, line))
                    .filter_map(|event| format_event(&event))
                    .collect();
                if !outputs.is_empty() {
                    return outputs;
                }
            }
            Err(e) => debug!(session_id, attempt, error = %e, "Short poll attempt failed"),
        }
        if attempt < tries {
            tokio::time::sleep(poll).await;
        }
    }
    Vec::new()
}

async fn fetch_once(source: &dyn TraceSource, session_id: &str) -> Result<String> {
    match source.fetch_proxy(session_id).await {
        Ok(body) => Ok(body),
        Err(e) if e.is_not_found() => Err(e),
        Err(_) => {
            let url = source.resolve_direct_url(session_id).await?;
            source.fetch_direct(&url).await
        }
    }
}

#[cfg(test)]
mod tests;
