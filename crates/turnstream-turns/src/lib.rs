//! Turnstream Turns - turn correlation and start de-duplication
//!
//! A chat front end reaches the backend in two request phases per user turn.
//! This crate decides which phases belong together and whether a turn may
//! launch its (expensive) pipeline:
//! - Request: pull identifying fields and the real query out of a chat body
//! - Fingerprint: hash of those fields plus a coarse time bucket
//! - Correlator: fingerprint to session id within a short join window
//! - StartGuard: one pipeline launch per key within a long start window

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod correlator;
pub mod fingerprint;
pub mod request;
pub mod start_guard;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use correlator::{new_session_id, sid_core, Resolved, TurnCorrelator};
pub use fingerprint::{fingerprint, start_key, time_bucket};
pub use request::{normalize_query, TurnRequest, UPLOAD_PREFIX};
pub use start_guard::StartGuard;

/// Correlation and guard windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnsConfig {
    /// Join window in seconds
    #[serde(default = "default_join_window_secs")]
    pub join_window_secs: u64,
    /// Start window in seconds
    #[serde(default = "default_start_window_secs")]
    pub start_window_secs: u64,
    /// Prefix of minted session ids
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
}

fn default_join_window_secs() -> u64 {
    10
}

fn default_start_window_secs() -> u64 {
    3600
}

fn default_session_prefix() -> String {
    "owui-".to_string()
}

impl Default for TurnsConfig {
    fn default() -> Self {
        Self {
            join_window_secs: default_join_window_secs(),
            start_window_secs: default_start_window_secs(),
            session_prefix: default_session_prefix(),
        }
    }
}

impl TurnsConfig {
    /// Join window
    #[must_use]
    pub fn join_window(&self) -> Duration {
        Duration::from_secs(self.join_window_secs.max(1))
    }

    /// Start window
    #[must_use]
    pub fn start_window(&self) -> Duration {
        Duration::from_secs(self.start_window_secs.max(1))
    }
}

/// Time from `since` to `now`; zero if the clock went backwards
pub(crate) fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
