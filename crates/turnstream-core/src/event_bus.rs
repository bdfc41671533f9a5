//! EventBus - per-session ordered event log and delivery queue
//!
//! The bus is the single source of truth for what happened in a session and
//! in which order. Each session owns:
//! - a bounded log (oldest entries evicted past `log_capacity`), flushed to the
//!   durable sink
//! - a delivery queue drained by live stream connections
//! - a flush counter
//!
//! Append, enqueue, trim and counter update for one `record` call happen under
//! the session's lock, so concurrent producers are linearizable and queue order
//! always equals log order. Durable writes are handed to the sink after the
//! lock is released.
//!
//! Timestamps are strictly increasing per session: a record that lands in the
//! same microsecond as (or, after a clock step back, before) its predecessor
//! is moved just past it. Trace readers rely on this to find their place in a
//! trimmed trace.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::debug;

use crate::blob::BlobStore;
use crate::event::{now_secs, Event, EventFields};
use crate::sink::{DurableSink, Snapshot};

/// When a flush happens relative to log eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushOrder {
    /// Flush the untrimmed log before evicting, so evicted events reach storage
    #[default]
    BeforeTrim,
    /// Evict first, flush only on the counter threshold
    AfterTrim,
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum events kept in memory per session
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Flush after this many records (1 = every record)
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
    /// Flush/trim ordering
    #[serde(default)]
    pub flush_order: FlushOrder,
    /// Key prefix for durable traces
    #[serde(default = "default_trace_prefix")]
    pub trace_prefix: String,
}

fn default_log_capacity() -> usize {
    5000
}

fn default_flush_every() -> usize {
    1
}

fn default_trace_prefix() -> String {
    "trace".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
            flush_every: default_flush_every(),
            flush_order: FlushOrder::default(),
            trace_prefix: default_trace_prefix(),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    log: VecDeque<Event>,
    queue: VecDeque<Event>,
    pending: usize,
    last_timestamp: f64,
}

#[derive(Debug, Default)]
struct SessionSlot {
    state: Mutex<SessionState>,
    notify: Notify,
}

impl SessionSlot {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // Poisoning is ignored: every mutation completes before any call that can panic.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct BusInner {
    sessions: DashMap<String, Arc<SessionSlot>>,
    config: BusConfig,
    sink: DurableSink,
    generation: AtomicU64,
}

/// Cheaply cloneable handle to the process-wide session registry
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sessions", &self.inner.sessions.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl EventBus {
    /// Create a bus persisting into `store`.
    ///
    /// Spawns the durable sink worker, so this must run inside a tokio runtime.
    pub fn new(config: BusConfig, store: Arc<dyn BlobStore>) -> Self {
        let sink = DurableSink::spawn(store, config.trace_prefix.clone());
        Self {
            inner: Arc::new(BusInner {
                sessions: DashMap::new(),
                config,
                sink,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Bus configuration
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Durable sink handle
    #[must_use]
    pub fn sink(&self) -> &DurableSink {
        &self.inner.sink
    }

    fn slot(&self, session_id: &str) -> Arc<SessionSlot> {
        if let Some(slot) = self.inner.sessions.get(session_id) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.inner
                .sessions
                .entry(session_id.to_string())
                .or_default()
                .value(),
        )
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn snapshot(&self, session_id: &str, state: &SessionState) -> Snapshot {
        Snapshot {
            session_id: session_id.to_string(),
            generation: self.next_generation(),
            events: state.log.iter().cloned().collect(),
        }
    }

    /// Record one event.
    ///
    /// Creates the session on first use, appends to the log, enqueues for
    /// delivery and schedules a durable flush when the counter reaches
    /// `flush_every`. Never fails and never waits on storage.
    pub fn record(
        &self,
        session_id: &str,
        node: &str,
        step_type: &str,
        fields: EventFields,
    ) -> Event {
        let slot = self.slot(session_id);
        let config = &self.inner.config;
        let capacity = config.log_capacity.max(1);

        let (event, snapshot) = {
            let mut state = slot.lock();

            let timestamp = next_timestamp(now_secs(), state.last_timestamp);
            state.last_timestamp = timestamp;
            let event = Event::new(timestamp, session_id, node, step_type, fields);

            state.log.push_back(event.clone());
            state.queue.push_back(event.clone());
            state.pending += 1;

            let overflow = state.log.len() > capacity;
            let due = state.pending >= config.flush_every.max(1);

            let snapshot = match config.flush_order {
                FlushOrder::BeforeTrim => {
                    let snapshot = (overflow || due).then(|| self.snapshot(session_id, &state));
                    trim(&mut state, capacity);
                    snapshot
                }
                FlushOrder::AfterTrim => {
                    trim(&mut state, capacity);
                    due.then(|| self.snapshot(session_id, &state))
                }
            };
            if snapshot.is_some() {
                state.pending = 0;
            }
            (event, snapshot)
        };

        slot.notify.notify_waiters();
        if let Some(snapshot) = snapshot {
            self.inner.sink.submit(snapshot);
        }
        event
    }

    /// Session-bound recording handle for pipeline stages
    #[must_use]
    pub fn recorder(&self, session_id: impl Into<String>) -> SessionRecorder {
        SessionRecorder {
            bus: self.clone(),
            session_id: session_id.into(),
        }
    }

    /// Attach to a session's delivery queue, creating the session if needed
    #[must_use]
    pub fn queue(&self, session_id: &str) -> SessionQueue {
        SessionQueue {
            session_id: session_id.to_string(),
            slot: self.slot(session_id),
        }
    }

    /// Pop the oldest undelivered event of a session
    #[must_use]
    pub fn pop_next(&self, session_id: &str) -> Option<Event> {
        let slot = self.inner.sessions.get(session_id).map(|s| Arc::clone(s.value()))?;
        let event = slot.lock().queue.pop_front();
        event
    }

    /// Copy of the in-memory log, oldest first
    #[must_use]
    pub fn log(&self, session_id: &str) -> Vec<Event> {
        self.inner
            .sessions
            .get(session_id)
            .map(|slot| slot.lock().log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Flush the session's current log and wait for the write.
    ///
    /// Returns `false` if the session is unknown or the write failed.
    pub async fn flush(&self, session_id: &str) -> bool {
        let Some(slot) = self.inner.sessions.get(session_id).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        let snapshot = {
            let mut state = slot.lock();
            state.pending = 0;
            self.snapshot(session_id, &state)
        };
        self.inner.sink.write(snapshot).await
    }

    /// Drop a finished session from memory and delete its durable trace.
    ///
    /// Returns whether the session was known in memory.
    pub async fn purge(&self, session_id: &str) -> bool {
        let existed = self.inner.sessions.remove(session_id).is_some();
        let generation = self.next_generation();
        self.inner.sink.purge(session_id, generation).await;
        debug!(session_id, existed, "Session purged");
        existed
    }

    /// Whether the session exists in memory
    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.sessions.contains_key(session_id)
    }

    /// Number of sessions held in memory
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }
}

/// Smallest step between two timestamps of one session
const TIMESTAMP_STEP: f64 = 1e-6;

/// Strictly increasing within a session, so a timestamp names one event
fn next_timestamp(now: f64, last: f64) -> f64 {
    if now > last {
        now
    } else {
        last + TIMESTAMP_STEP
    }
}

fn trim(state: &mut SessionState, capacity: usize) {
    let extra = state.log.len().saturating_sub(capacity);
    if extra > 0 {
        state.log.drain(..extra);
    }
    // The queue shares the bound so a session nobody listens to can't grow forever.
    let extra = state.queue.len().saturating_sub(capacity);
    if extra > 0 {
        state.queue.drain(..extra);
    }
}

/// A session's delivery queue, as seen by one live connection
#[derive(Clone)]
pub struct SessionQueue {
    session_id: String,
    slot: Arc<SessionSlot>,
}

impl SessionQueue {
    /// Session id
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Pop the oldest undelivered event
    #[must_use]
    pub fn pop(&self) -> Option<Event> {
        self.slot.lock().queue.pop_front()
    }

    /// Number of undelivered events
    #[must_use]
    pub fn len(&self) -> usize {
        self.slot.lock().queue.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Future that resolves on the next `record` for this session
    pub fn notified(&self) -> Notified<'_> {
        self.slot.notify.notified()
    }
}

/// Recording handle bound to one session; what pipeline stages receive
#[derive(Clone, Debug)]
pub struct SessionRecorder {
    bus: EventBus,
    session_id: String,
}

impl SessionRecorder {
    /// Session id
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record an event in this session
    pub fn record(&self, node: &str, step_type: &str, fields: EventFields) -> Event {
        self.bus.record(&self.session_id, node, step_type, fields)
    }

    /// The bus behind this recorder
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests;
