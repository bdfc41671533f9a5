use super::*;
use crate::blob::MemoryBlobStore;
use crate::event::EventType;
use bytes::Bytes;

fn bus_with(config: BusConfig) -> (EventBus, MemoryBlobStore) {
    let store = MemoryBlobStore::new();
    let bus = EventBus::new(config, Arc::new(store.clone()));
    (bus, store)
}

async fn durable_events(store: &MemoryBlobStore, session_id: &str) -> Vec<Event> {
    let body: Bytes = store
        .get(&format!("trace/{session_id}.jsonl"))
        .await
        .unwrap();
    std::str::from_utf8(&body)
        .unwrap()
        .lines()
        .map(|l| Event::from_json_line(l).unwrap())
        .collect()
}

fn steps(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.step_type.clone()).collect()
}

#[tokio::test]
async fn test_record_creates_session_lazily() {
    let (bus, _) = bus_with(BusConfig::default());
    assert!(!bus.contains("s1"));

    let event = bus.record("s1", "loader", "read", EventFields::new());

    assert!(bus.contains("s1"));
    assert_eq!(bus.session_count(), 1);
    assert_eq!(event.session_id, "s1");
    assert_eq!(event.event_type(), &EventType::Trace);
    assert_eq!(bus.log("s1").len(), 1);
}

#[tokio::test]
async fn test_queue_order_matches_log_order() {
    let (bus, _) = bus_with(BusConfig::default());
    for i in 0..10 {
        bus.record("s1", "node", &format!("step-{i}"), EventFields::new());
    }

    let log = bus.log("s1");
    let mut delivered = Vec::new();
    while let Some(e) = bus.pop_next("s1") {
        delivered.push(e);
    }
    assert_eq!(delivered, log);
    assert!(bus.pop_next("s1").is_none());
}

#[tokio::test]
async fn test_timestamps_strictly_increasing() {
    let (bus, _) = bus_with(BusConfig::default());
    for _ in 0..200 {
        bus.record("s1", "n", "s", EventFields::new());
    }
    let log = bus.log("s1");
    assert!(log.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[test]
fn test_next_timestamp_steps_past_a_clock_going_back() {
    assert_eq!(next_timestamp(10.0, 5.0), 10.0);
    let stepped = next_timestamp(1_700_000_000.0, 1_700_000_000.0);
    assert!(stepped > 1_700_000_000.0);
    assert!(next_timestamp(3.0, 4.0) > 4.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_lose_nothing() {
    let (bus, store) = bus_with(BusConfig {
        flush_every: 7,
        ..Default::default()
    });

    let mut handles = Vec::new();
    for producer in 0..8 {
        let bus = bus.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                bus.record("s1", &format!("p{producer}"), &format!("{i}"), EventFields::new());
                tokio::task::yield_now().await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let log = bus.log("s1");
    assert_eq!(log.len(), 400);

    // Each producer's own events appear in the order it recorded them.
    for producer in 0..8 {
        let node = format!("p{producer}");
        let seq: Vec<usize> = log
            .iter()
            .filter(|e| e.node == node)
            .map(|e| e.step_type.parse().unwrap())
            .collect();
        assert_eq!(seq, (0..50).collect::<Vec<_>>());
    }

    let mut delivered = Vec::new();
    while let Some(e) = bus.pop_next("s1") {
        delivered.push(e);
    }
    assert_eq!(delivered, log);

    assert!(bus.flush("s1").await);
    assert_eq!(durable_events(&store, "s1").await, log);
}

#[tokio::test]
async fn test_flush_threshold_writes_durable_trace() {
    let (bus, store) = bus_with(BusConfig {
        flush_every: 3,
        ..Default::default()
    });
    bus.record("s1", "a", "1", EventFields::new());
    bus.record("s1", "a", "2", EventFields::new());
    bus.record("s1", "a", "3", EventFields::new());
    bus.record("s1", "a", "4", EventFields::new());

    // A round-trip through the worker guarantees earlier submissions landed.
    let marker = bus.sink().write(crate::sink::Snapshot {
        session_id: "marker".into(),
        generation: u64::MAX,
        events: vec![],
    });
    assert!(marker.await);

    // Threshold hit at the third record; the fourth is still pending.
    assert_eq!(steps(&durable_events(&store, "s1").await), vec!["1", "2", "3"]);

    assert!(bus.flush("s1").await);
    assert_eq!(
        steps(&durable_events(&store, "s1").await),
        vec!["1", "2", "3", "4"]
    );
}

#[tokio::test]
async fn test_bounded_log_keeps_most_recent() {
    let (bus, _) = bus_with(BusConfig {
        log_capacity: 5,
        ..Default::default()
    });
    for i in 0..12 {
        bus.record("s1", "n", &i.to_string(), EventFields::new());
    }
    assert_eq!(steps(&bus.log("s1")), vec!["7", "8", "9", "10", "11"]);
}

#[tokio::test]
async fn test_flush_before_trim_preserves_evicted_events() {
    let (bus, store) = bus_with(BusConfig {
        log_capacity: 3,
        flush_every: 100,
        flush_order: FlushOrder::BeforeTrim,
        ..Default::default()
    });
    for i in 0..4 {
        bus.record("s1", "n", &i.to_string(), EventFields::new());
    }
    let marker = bus.sink().write(crate::sink::Snapshot {
        session_id: "marker".into(),
        generation: u64::MAX,
        events: vec![],
    });
    assert!(marker.await);

    // The eviction of "0" forced a flush of the untrimmed log.
    assert_eq!(
        steps(&durable_events(&store, "s1").await),
        vec!["0", "1", "2", "3"]
    );
    assert_eq!(steps(&bus.log("s1")), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_flush_after_trim_loses_evicted_events() {
    let (bus, store) = bus_with(BusConfig {
        log_capacity: 3,
        flush_every: 100,
        flush_order: FlushOrder::AfterTrim,
        ..Default::default()
    });
    for i in 0..4 {
        bus.record("s1", "n", &i.to_string(), EventFields::new());
    }
    assert!(!store.exists("trace/s1.jsonl").await.unwrap());

    assert!(bus.flush("s1").await);
    assert_eq!(
        steps(&durable_events(&store, "s1").await),
        vec!["1", "2", "3"]
    );
}

#[tokio::test]
async fn test_purge_removes_memory_and_storage() {
    let (bus, store) = bus_with(BusConfig::default());
    bus.record("s1", "n", "a", EventFields::new());
    assert!(bus.flush("s1").await);
    store
        .put("artifacts/s1/plot.png", Bytes::from_static(b"png"))
        .await
        .unwrap();

    assert!(bus.purge("s1").await);
    assert!(!bus.contains("s1"));
    assert!(!store.exists("trace/s1.jsonl").await.unwrap());
    assert!(!store.exists("artifacts/s1/plot.png").await.unwrap());
    assert!(!bus.purge("s1").await);
}

#[tokio::test]
async fn test_flush_unknown_session() {
    let (bus, _) = bus_with(BusConfig::default());
    assert!(!bus.flush("missing").await);
    assert!(bus.log("missing").is_empty());
}

#[tokio::test]
async fn test_recorder_binds_session() {
    let (bus, _) = bus_with(BusConfig::default());
    let recorder = bus.recorder("s9");
    recorder.record(
        "analysis",
        "tool_call",
        EventFields::new().with_tool_name("describe"),
    );
    let log = bus.log("s9");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].fields.tool_name.as_deref(), Some("describe"));
    assert_eq!(recorder.session_id(), "s9");
}

struct FailingStore;

#[async_trait::async_trait]
impl BlobStore for FailingStore {
    async fn put(&self, _key: &str, _body: Bytes) -> crate::Result<()> {
        Err(crate::Error::Storage("bucket unavailable".into()))
    }
    async fn get(&self, key: &str) -> crate::Result<Bytes> {
        Err(crate::Error::NotFound(key.to_string()))
    }
    async fn exists(&self, _key: &str) -> crate::Result<bool> {
        Ok(false)
    }
    async fn delete(&self, _key: &str) -> crate::Result<()> {
        Err(crate::Error::Storage("bucket unavailable".into()))
    }
    async fn delete_prefix(&self, _prefix: &str) -> crate::Result<usize> {
        Err(crate::Error::Storage("bucket unavailable".into()))
    }
    fn direct_url(&self, _key: &str) -> Option<String> {
        None
    }
    fn name(&self) -> &str {
        "failing"
    }
}

#[tokio::test]
async fn test_storage_failure_does_not_reach_producers() {
    let bus = EventBus::new(BusConfig::default(), Arc::new(FailingStore));
    for i in 0..5 {
        bus.record("s1", "n", &i.to_string(), EventFields::new());
    }
    assert_eq!(bus.log("s1").len(), 5);
    assert!(!bus.flush("s1").await);
    assert!(bus.purge("s1").await);
}
