//! Integration tests for turnstream
//!
//! These tests verify the integration between the crates:
//! - turnstream-core: recording, delivery and durable traces
//! - turnstream-turns: turn correlation feeding session ids
//! - turnstream-replay: reading sessions back from the trace

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use turnstream_core::{
    format_event, BlobStore, BusConfig, DeliveryConfig, EventBus, EventFields, EventType, Frame,
    MemoryBlobStore, PipelineRunner, StageContext, StreamDelivery,
};
use turnstream_replay::{StoreTraceSource, TraceSource, TraceTail};
use turnstream_turns::{fingerprint, time_bucket, TurnCorrelator, TurnRequest};

fn bus() -> (EventBus, Arc<dyn BlobStore>) {
    let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    (EventBus::new(BusConfig::default(), Arc::clone(&store)), store)
}

// ============================================================================
// Live delivery and durable replay
// ============================================================================

#[tokio::test]
async fn test_live_and_replayed_outputs_match() {
    let (bus, store) = bus();
    let outcome = PipelineRunner::new()
        .run(&bus, StageContext::new("s1", "uploaded/a.csv", "mean"))
        .await;
    assert!(outcome.is_success());

    let delivery = StreamDelivery::new(
        &bus,
        "s1",
        DeliveryConfig::default(),
        CancellationToken::new(),
    );
    let live: Vec<String> = delivery
        .into_stream()
        .take(2)
        .filter_map(|frame| async move {
            match frame {
                Frame::Event(event) => format_event(&event),
                Frame::Heartbeat(_) => None,
            }
        })
        .collect()
        .await;

    let source: Arc<dyn TraceSource> = Arc::new(StoreTraceSource::new(store, "trace"));
    let replayed: Vec<String> = TraceTail::new(source, "s1", Duration::from_millis(10))
        .into_stream()
        .collect()
        .await;

    assert_eq!(live.len(), 2);
    assert_eq!(live, replayed);
}

#[tokio::test]
async fn test_events_recorded_after_purge_start_a_fresh_trace() {
    let (bus, store) = bus();
    bus.record("s1", "loader", "trace", EventFields::new().with_content("old"));
    assert!(bus.flush("s1").await);
    assert!(bus.purge("s1").await);

    bus.record("s1", "loader", "trace", EventFields::new().with_content("new"));
    assert!(bus.flush("s1").await);

    let trace = StoreTraceSource::new(store, "trace")
        .fetch_proxy("s1")
        .await
        .unwrap();
    assert_eq!(trace.lines().count(), 1);
    assert!(trace.contains("\"new\""));
}

// ============================================================================
// Turn correlation
// ============================================================================

#[tokio::test]
async fn test_correlated_phases_record_into_one_session() {
    let (bus, _) = bus();
    let correlator = TurnCorrelator::new(Duration::from_secs(10), "owui-");
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    let mut sessions = Vec::new();
    for phase in ["inlet", "outlet"] {
        let request = TurnRequest::from_chat_body(&json!({
            "conversation_id": "c-1",
            "messages": [
                {"role": "assistant", "content": "hello"},
                {"role": "user", "id": "u-9", "content": "FILE: uploaded/x.csv trend?"}
            ]
        }));
        let fp = fingerprint(
            &request.conversation_id,
            &request.last_user_id,
            &request.query,
            time_bucket(now, Duration::from_secs(10)),
        );
        let session = correlator.resolve_at(&fp, now).session_id;
        bus.record(
            &session,
            phase,
            "trace",
            EventFields::new().with_type(EventType::Trace).with_content(phase),
        );
        sessions.push(session);
    }

    assert_eq!(sessions[0], sessions[1]);
    assert_eq!(bus.session_count(), 1);
    assert_eq!(bus.log(&sessions[0]).len(), 2);
}
