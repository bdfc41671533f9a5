//! TurnCorrelator - fingerprint to session id within a join window
//!
//! The two request phases of one chat turn arrive moments apart with the same
//! fingerprint and must land on the same session. An entry lives for one join
//! window after its last touch; a streaming turn keeps touching its
//! fingerprint so a long run never splits into two sessions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::elapsed;

const SESSION_SUFFIX_LEN: usize = 24;

/// Outcome of a fingerprint lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Session id for the turn
    pub session_id: String,
    /// Whether an existing mapping was reused
    pub reused: bool,
}

#[derive(Debug, Clone)]
struct TurnEntry {
    session_id: String,
    last_touch: DateTime<Utc>,
}

/// Fingerprint registry
#[derive(Debug)]
pub struct TurnCorrelator {
    join_window: Duration,
    session_prefix: String,
    entries: Mutex<HashMap<String, TurnEntry>>,
}

impl TurnCorrelator {
    /// Create a correlator minting ids as `<session_prefix><24 hex chars>`
    #[must_use]
    pub fn new(join_window: Duration, session_prefix: impl Into<String>) -> Self {
        Self {
            join_window,
            session_prefix: session_prefix.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Join window
    #[must_use]
    pub fn join_window(&self) -> Duration {
        self.join_window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TurnEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session id for `fingerprint`, reusing a live mapping or minting a new one
    pub fn resolve(&self, fingerprint: &str) -> Resolved {
        self.resolve_at(fingerprint, Utc::now())
    }

    /// [`resolve`](Self::resolve) at an explicit time
    pub fn resolve_at(&self, fingerprint: &str, now: DateTime<Utc>) -> Resolved {
        let window = self.join_window;
        let mut entries = self.lock();
        entries.retain(|_, e| elapsed(e.last_touch, now) <= window);

        if let Some(entry) = entries.get_mut(fingerprint) {
            entry.last_touch = now;
            return Resolved {
                session_id: entry.session_id.clone(),
                reused: true,
            };
        }

        let session_id = new_session_id(&self.session_prefix);
        debug!(fingerprint, session_id = %session_id, "New turn session");
        entries.insert(
            fingerprint.to_string(),
            TurnEntry {
                session_id: session_id.clone(),
                last_touch: now,
            },
        );
        Resolved {
            session_id,
            reused: false,
        }
    }

    /// Refresh a fingerprint's window; returns `false` if it is not tracked
    pub fn touch(&self, fingerprint: &str) -> bool {
        self.touch_at(fingerprint, Utc::now())
    }

    /// [`touch`](Self::touch) at an explicit time
    pub fn touch_at(&self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        let window = self.join_window;
        let mut entries = self.lock();
        match entries.get_mut(fingerprint) {
            Some(entry) if elapsed(entry.last_touch, now) <= window => {
                entry.last_touch = now;
                true
            }
            _ => false,
        }
    }

    /// Number of tracked fingerprints (expired ones included until the next resolve)
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fresh `<prefix><24 hex chars>` session id
#[must_use]
pub fn new_session_id(prefix: &str) -> String {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(SESSION_SUFFIX_LEN);
    format!("{prefix}{suffix}")
}

/// Session id without its front-end prefix
#[must_use]
pub fn sid_core<'a>(session_id: &'a str, prefix: &str) -> &'a str {
    session_id.strip_prefix(prefix).unwrap_or(session_id)
}
