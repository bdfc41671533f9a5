//! StartGuard - at most one pipeline launch per key within the start window
//!
//! Keys should come from [`start_key`](crate::fingerprint::start_key) so two
//! unrelated turns that happen to share a session id are not suppressed
//! against each other. The map is independent of the correlator: a key stays
//! guarded long after its join window has lapsed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::elapsed;

/// Launch de-duplication registry
#[derive(Debug)]
pub struct StartGuard {
    window: Duration,
    started: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl StartGuard {
    /// Guard with the given start window
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started: Mutex::new(HashMap::new()),
        }
    }

    /// Start window
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.started.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `true` if `key` already started within the window; otherwise records
    /// this start and returns `false`
    pub fn should_suppress_start(&self, key: &str) -> bool {
        self.should_suppress_start_at(key, Utc::now())
    }

    /// [`should_suppress_start`](Self::should_suppress_start) at an explicit time
    pub fn should_suppress_start_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let window = self.window;
        let mut started = self.lock();
        started.retain(|_, first| elapsed(*first, now) <= window);

        if let Some(first) = started.get(key) {
            if elapsed(*first, now) < window {
                debug!(key, "Start suppressed");
                return true;
            }
        }
        started.insert(key.to_string(), now);
        false
    }

    /// Number of guarded keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is guarded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
