//! StreamDelivery - drains one session's queue over a long-lived connection
//!
//! Each live connection owns a small state machine:
//!
//! ```text
//! WaitEvent --(queue non-empty)--> Emit --> WaitEvent
//! WaitEvent --(no frame for `heartbeat`)--> Heartbeat --> WaitEvent
//! any state --(cancel)--> Close
//! ```
//!
//! `WaitEvent` never blocks on the queue: it re-checks after a short idle
//! interval or as soon as the bus signals a new record, whichever comes first.
//! Closing a connection only stops this loop; the producer side is untouched
//! and the session keeps accumulating and flushing events.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::Event;
use crate::event_bus::{EventBus, SessionQueue};

/// Delivery timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Re-check interval while the queue is empty, in milliseconds
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Heartbeat after this many seconds without a frame
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_idle_poll_ms() -> u64 {
    200
}

fn default_heartbeat_secs() -> u64 {
    10
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: default_idle_poll_ms(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl DeliveryConfig {
    /// Idle re-check interval
    #[must_use]
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    /// Heartbeat interval
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// One unit pushed to the client
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A recorded event
    Event(Event),
    /// Keep-alive comment carrying the unix time it was sent
    Heartbeat(i64),
}

#[derive(Debug)]
enum DeliveryState {
    WaitEvent,
    Emit(Event),
    Heartbeat,
    Close,
}

type EmitHook = Arc<dyn Fn(&Event) + Send + Sync>;

/// Per-connection delivery loop
pub struct StreamDelivery {
    queue: SessionQueue,
    config: DeliveryConfig,
    cancel: CancellationToken,
    state: DeliveryState,
    last_frame: Instant,
    on_emit: Option<EmitHook>,
}

impl std::fmt::Debug for StreamDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDelivery")
            .field("session_id", &self.queue.session_id())
            .field("state", &self.state)
            .finish()
    }
}

impl StreamDelivery {
    /// Attach to a session's queue. The session is created if it does not exist yet.
    #[must_use]
    pub fn new(
        bus: &EventBus,
        session_id: &str,
        config: DeliveryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue: bus.queue(session_id),
            config,
            cancel,
            state: DeliveryState::WaitEvent,
            last_frame: Instant::now(),
            on_emit: None,
        }
    }

    /// Call `hook` for every event right before it is emitted
    #[must_use]
    pub fn on_emit(mut self, hook: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.on_emit = Some(Arc::new(hook));
        self
    }

    /// Session this connection delivers
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.queue.session_id()
    }

    /// Drive the state machine until it yields a frame.
    ///
    /// Returns `None` once the connection is cancelled; every later call
    /// returns `None` as well.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match std::mem::replace(&mut self.state, DeliveryState::WaitEvent) {
                DeliveryState::WaitEvent => {
                    self.state = self.wait().await;
                }
                DeliveryState::Emit(event) => {
                    if let Some(hook) = &self.on_emit {
                        hook(&event);
                    }
                    self.last_frame = Instant::now();
                    return Some(Frame::Event(event));
                }
                DeliveryState::Heartbeat => {
                    self.last_frame = Instant::now();
                    return Some(Frame::Heartbeat(chrono::Utc::now().timestamp()));
                }
                DeliveryState::Close => {
                    self.state = DeliveryState::Close;
                    debug!(session_id = %self.queue.session_id(), "Stream delivery closed");
                    return None;
                }
            }
        }
    }

    async fn wait(&mut self) -> DeliveryState {
        // Register for the wake-up before looking at the queue so a record
        // landing in between is not missed.
        let notified = self.queue.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.cancel.is_cancelled() {
            return DeliveryState::Close;
        }
        if let Some(event) = self.queue.pop() {
            return DeliveryState::Emit(event);
        }

        let heartbeat_at = self.last_frame + self.config.heartbeat();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => DeliveryState::Close,
            () = &mut notified => DeliveryState::WaitEvent,
            () = sleep(self.config.idle_poll()) => DeliveryState::WaitEvent,
            () = sleep_until(heartbeat_at) => DeliveryState::Heartbeat,
        }
    }

    /// Turn the loop into a `Stream` of frames
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send {
        futures::stream::unfold(self, |mut delivery| async move {
            let frame = delivery.next_frame().await?;
            Some((frame, delivery))
        })
    }
}
