//! Turn fingerprints
//!
//! `sha256("{conversation}||uid:{last_user_id}||q:{query}||win:{bucket}")`,
//! hex-encoded and cut to 32 characters. Any field may be empty; the time
//! bucket alone keeps identical queries in different windows apart.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const FINGERPRINT_LEN: usize = 32;

/// Coarse time bucket: `floor(now / window)`
#[must_use]
pub fn time_bucket(now: DateTime<Utc>, window: Duration) -> i64 {
    let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX).max(1);
    now.timestamp().div_euclid(window)
}

/// Fingerprint of one logical turn
#[must_use]
pub fn fingerprint(conversation_id: &str, last_user_id: &str, query: &str, bucket: i64) -> String {
    let seed = format!("{conversation_id}||uid:{last_user_id}||q:{query}||win:{bucket}");
    short_hash(&seed)
}

/// StartGuard key: the turn fingerprint narrowed by target file and query
#[must_use]
pub fn start_key(fingerprint: &str, file_ref: &str, query: &str) -> String {
    short_hash(&format!("{fingerprint}||file:{file_ref}||q:{query}"))
}

fn short_hash(seed: &str) -> String {
    let mut hex = hex::encode(Sha256::digest(seed.as_bytes()));
    hex.truncate(FINGERPRINT_LEN);
    hex
}
