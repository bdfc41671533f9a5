//! DurableSink - persists session logs to the blob store
//!
//! The sink is an owned-state worker reached only through a channel, so the
//! event bus never performs storage I/O while it holds a session lock. Every
//! flush overwrites `<prefix>/<session_id>.jsonl` with the full snapshot it
//! was handed.
//!
//! Snapshots carry a generation number taken from a bus-wide counter while
//! the session lock was held. The worker remembers the newest generation it
//! wrote per session and drops anything older, so a snapshot that was queued
//! late can never clobber a newer trace. A purge leaves the same kind of
//! floor behind. At most `GENERATION_MEMORY` floors are kept; past that the
//! oldest generations are forgotten, long after any snapshot taken before
//! them could still be queued.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::blob::{artifact_prefix, trace_key, BlobStore};
use crate::event::Event;

const GENERATION_MEMORY: usize = 4096;

/// A point-in-time copy of one session's log
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Session the log belongs to
    pub session_id: String,
    /// Bus-wide monotonically increasing generation
    pub generation: u64,
    /// Events, oldest first
    pub events: Vec<Event>,
}

impl Snapshot {
    /// Serialize as newline-delimited JSON
    pub fn to_jsonl(&self) -> crate::Result<Bytes> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&event.to_json_line()?);
            out.push('\n');
        }
        Ok(Bytes::from(out))
    }
}

enum SinkCommand {
    Write {
        snapshot: Snapshot,
        ack: Option<oneshot::Sender<bool>>,
    },
    Purge {
        session_id: String,
        generation: u64,
        ack: oneshot::Sender<()>,
    },
}

/// Handle to the durable sink worker.
///
/// Cloning is cheap; all clones feed the same worker.
#[derive(Clone)]
pub struct DurableSink {
    tx: mpsc::UnboundedSender<SinkCommand>,
    store: Arc<dyn BlobStore>,
    trace_prefix: String,
}

impl std::fmt::Debug for DurableSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableSink")
            .field("store", &self.store.name())
            .field("trace_prefix", &self.trace_prefix)
            .finish()
    }
}

impl DurableSink {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(store: Arc<dyn BlobStore>, trace_prefix: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let trace_prefix = trace_prefix.into();
        let worker = SinkWorker {
            store: Arc::clone(&store),
            trace_prefix: trace_prefix.clone(),
            written: HashMap::new(),
            capacity: GENERATION_MEMORY,
        };
        tokio::spawn(worker.run(rx));
        Self {
            tx,
            store,
            trace_prefix,
        }
    }

    /// Queue a snapshot for writing; never blocks
    pub fn submit(&self, snapshot: Snapshot) {
        let session_id = snapshot.session_id.clone();
        if self
            .tx
            .send(SinkCommand::Write {
                snapshot,
                ack: None,
            })
            .is_err()
        {
            warn!(session_id = %session_id, "Durable sink worker is gone; snapshot dropped");
        }
    }

    /// Write a snapshot and wait for the outcome.
    ///
    /// Returns `true` if the object was written, `false` if the write failed
    /// or was skipped as stale.
    pub async fn write(&self, snapshot: Snapshot) -> bool {
        let (ack, done) = oneshot::channel();
        if self
            .tx
            .send(SinkCommand::Write {
                snapshot,
                ack: Some(ack),
            })
            .is_err()
        {
            return false;
        }
        done.await.unwrap_or(false)
    }

    /// Delete a session's trace and artifacts.
    ///
    /// Snapshots with a generation at or below `generation` that are still
    /// queued are discarded.
    pub async fn purge(&self, session_id: &str, generation: u64) {
        let (ack, done) = oneshot::channel();
        if self
            .tx
            .send(SinkCommand::Purge {
                session_id: session_id.to_string(),
                generation,
                ack,
            })
            .is_ok()
        {
            let _ = done.await;
        }
    }

    /// Durable key for a session
    #[must_use]
    pub fn key_for(&self, session_id: &str) -> String {
        trace_key(&self.trace_prefix, session_id)
    }

    /// Underlying blob store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }
}

struct SinkWorker {
    store: Arc<dyn BlobStore>,
    trace_prefix: String,
    written: HashMap<String, u64>,
    capacity: usize,
}

impl SinkWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SinkCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                SinkCommand::Write { snapshot, ack } => {
                    let ok = self.write(snapshot).await;
                    if let Some(ack) = ack {
                        let _ = ack.send(ok);
                    }
                }
                SinkCommand::Purge {
                    session_id,
                    generation,
                    ack,
                } => {
                    self.purge(&session_id, generation).await;
                    let _ = ack.send(());
                }
            }
        }
        debug!("Durable sink worker stopped");
    }

    async fn write(&mut self, snapshot: Snapshot) -> bool {
        let last = self.written.get(&snapshot.session_id).copied().unwrap_or(0);
        if snapshot.generation <= last {
            debug!(
                session_id = %snapshot.session_id,
                generation = snapshot.generation,
                last,
                "Skipping stale snapshot"
            );
            return false;
        }

        let key = trace_key(&self.trace_prefix, &snapshot.session_id);
        let body = match snapshot.to_jsonl() {
            Ok(body) => body,
            Err(e) => {
                warn!(session_id = %snapshot.session_id, error = %e, "Failed to serialize trace");
                return false;
            }
        };

        match self.store.put(&key, body).await {
            Ok(()) => {
                debug!(
                    session_id = %snapshot.session_id,
                    events = snapshot.events.len(),
                    key = %key,
                    "Trace flushed"
                );
                self.remember(snapshot.session_id, snapshot.generation);
                true
            }
            Err(e) => {
                warn!(session_id = %snapshot.session_id, key = %key, error = %e, "Failed to write trace");
                false
            }
        }
    }

    async fn purge(&mut self, session_id: &str, generation: u64) {
        let floor = self.written.get(session_id).copied().unwrap_or(0);
        self.remember(session_id.to_string(), generation.max(floor));

        let key = trace_key(&self.trace_prefix, session_id);
        if let Err(e) = self.store.delete(&key).await {
            warn!(session_id, key = %key, error = %e, "Failed to delete trace");
        }
        let prefix = format!("{}/", artifact_prefix(session_id));
        match self.store.delete_prefix(&prefix).await {
            Ok(removed) => debug!(session_id, removed, "Session artifacts removed"),
            Err(e) => warn!(session_id, error = %e, "Failed to delete session artifacts"),
        }
    }

    /// Record a generation floor, forgetting the oldest half once full
    fn remember(&mut self, session_id: String, generation: u64) {
        self.written.insert(session_id, generation);
        if self.written.len() <= self.capacity {
            return;
        }
        let keep = (self.capacity / 2).max(1);
        let mut generations: Vec<u64> = self.written.values().copied().collect();
        generations.sort_unstable();
        let cutoff = generations[generations.len() - keep];
        self.written.retain(|_, g| *g >= cutoff);
        debug!(kept = self.written.len(), "Forgot oldest snapshot generations");
    }
}
