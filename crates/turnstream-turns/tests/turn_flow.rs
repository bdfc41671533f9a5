//! Two request phases of one chat turn, end to end

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use turnstream_turns::{
    fingerprint, start_key, time_bucket, StartGuard, TurnCorrelator, TurnRequest, TurnsConfig,
};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn phase_body(content: &str) -> serde_json::Value {
    json!({
        "chat_id": "chat-7",
        "messages": [{"role": "user", "id": "u-1", "content": content}]
    })
}

struct Front {
    config: TurnsConfig,
    correlator: TurnCorrelator,
    guard: StartGuard,
}

impl Front {
    fn new() -> Self {
        let config = TurnsConfig::default();
        Self {
            correlator: TurnCorrelator::new(config.join_window(), config.session_prefix.clone()),
            guard: StartGuard::new(config.start_window()),
            config,
        }
    }

    /// Returns (session id, launched)
    fn handle(&self, body: &serde_json::Value, now: DateTime<Utc>) -> (String, bool) {
        let req = TurnRequest::from_chat_body(body);
        let bucket = time_bucket(now, self.config.join_window());
        let fp = fingerprint(&req.conversation_id, &req.last_user_id, &req.query, bucket);
        let session = self.correlator.resolve_at(&fp, now);
        let key = start_key(&fp, &req.file_path.clone().unwrap_or_default(), &req.query);
        let launched = !self.guard.should_suppress_start_at(&key, now);
        (session.session_id, launched)
    }
}

#[test]
fn inlet_and_outlet_share_one_session_and_one_launch() {
    let front = Front::new();
    // Both phases fall in the same 10s bucket.
    let (sid_a, launched_a) = front.handle(&phase_body("FILE: uploaded/a.csv mean age"), at(0));
    let (sid_b, launched_b) = front.handle(&phase_body("FILE: uploaded/a.csv mean age"), at(3));

    assert_eq!(sid_a, sid_b);
    assert!(launched_a);
    assert!(!launched_b);
}

#[test]
fn same_question_later_is_a_new_turn() {
    let front = Front::new();
    let (first, _) = front.handle(&phase_body("mean age"), at(0));
    let (second, launched) = front.handle(&phase_body("mean age"), at(60));

    assert_ne!(first, second);
    assert!(launched);
}

#[test]
fn file_noise_does_not_split_a_turn() {
    let front = Front::new();
    let (a, _) = front.handle(&phase_body("mean age of ab_ball501.txt"), at(0));
    let (b, _) = front.handle(&phase_body("mean age of"), at(2));
    assert_eq!(a, b);
}
