use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use turnstream_core::{EventFields, EventType};

use super::*;
use crate::error::Error;
use crate::source::MockTraceSource;

const POLL: Duration = Duration::from_secs(1);

fn line(node: &str, event_type: EventType, content: &str) -> String {
    let step_type = event_type.as_str().to_string();
    Event::new(
        1.0,
        "s1",
        node,
        step_type,
        EventFields::new().with_type(event_type).with_content(content),
    )
    .to_json_line()
    .unwrap()
}

fn trace(lines: &[String]) -> String {
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

async fn collect(mut tail: TraceTail) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(chunk) = tail.next_chunk().await {
        out.push(chunk);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_malformed_line_is_skipped() {
    let body = trace(&[
        line("loader", EventType::Trace, "read 3 rows"),
        "{\"timestamp\": oops".to_string(),
        line("pipeline", EventType::End, "done"),
    ]);
    let mut source = MockTraceSource::new();
    source
        .expect_fetch_proxy()
        .returning(move |_| Ok(body.clone()));

    let out = collect(TraceTail::new(Arc::new(source), "s1", POLL)).await;
    assert_eq!(out, vec!["read 3 rows\n", "**[END]** done\n\n"]);
}

#[tokio::test(start_paused = true)]
async fn test_stops_at_terminal_event() {
    let body = trace(&[
        line("loader", EventType::Trace, "a"),
        line("pipeline", EventType::End, "done"),
        line("late", EventType::Trace, "never shown"),
    ]);
    let mut source = MockTraceSource::new();
    source
        .expect_fetch_proxy()
        .times(1)
        .returning(move |_| Ok(body.clone()));

    let mut tail = TraceTail::new(Arc::new(source), "s1", POLL);
    assert_eq!(tail.next_chunk().await.as_deref(), Some("a\n"));
    assert_eq!(tail.next_chunk().await.as_deref(), Some("**[END]** done\n\n"));
    assert!(tail.next_chunk().await.is_none());
    assert!(tail.is_finished());
    assert_eq!(tail.offset(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_end_from_non_terminal_node_keeps_tailing() {
    let first = trace(&[line("analysis", EventType::End, "step over")]);
    let second = trace(&[
        line("analysis", EventType::End, "step over"),
        line("service", EventType::End, "bye"),
    ]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut source = MockTraceSource::new();
    source.expect_fetch_proxy().returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(first.clone())
        } else {
            Ok(second.clone())
        }
    });

    let out = collect(TraceTail::new(Arc::new(source), "s1", POLL)).await;
    assert_eq!(out, vec!["**[END]** step over\n\n", "**[END]** bye\n\n"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_trace_is_polled_until_it_appears() {
    let body = trace(&[line("pipeline", EventType::End, "done")]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut source = MockTraceSource::new();
    source.expect_fetch_proxy().returning(move |sid| {
        if counter.fetch_add(1, Ordering::SeqCst) < 3 {
            Err(Error::NotFound(format!("trace/{sid}.jsonl")))
        } else {
            Ok(body.clone())
        }
    });
    source.expect_resolve_direct_url().never();

    let started = tokio::time::Instant::now();
    let out = collect(TraceTail::new(Arc::new(source), "s1", POLL)).await;
    assert_eq!(out.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_proxy_failure_falls_back_to_direct_url_once() {
    let first = trace(&[line("loader", EventType::Trace, "a")]);
    let second = trace(&[
        line("loader", EventType::Trace, "a"),
        line("pipeline", EventType::End, "done"),
    ]);
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reads);

    let mut source = MockTraceSource::new();
    source.expect_fetch_proxy().times(1).returning(|_| {
        Err(Error::Status {
            status: 502,
            url: "http://backend/trace/s1?raw=1".into(),
        })
    });
    source
        .expect_resolve_direct_url()
        .times(1)
        .returning(|sid| Ok(format!("http://minio/bucket/trace/{sid}.jsonl")));
    source
        .expect_fetch_direct()
        .withf(|url: &str| url == "http://minio/bucket/trace/s1.jsonl")
        .returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(first.clone())
            } else {
                Ok(second.clone())
            }
        });

    let out = collect(TraceTail::new(Arc::new(source), "s1", POLL)).await;
    assert_eq!(out, vec!["a\n", "**[END]** done\n\n"]);
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_direct_url_yields_one_error_line() {
    let mut source = MockTraceSource::new();
    source
        .expect_fetch_proxy()
        .returning(|_| Err(Error::Network("connection refused".into())));
    source
        .expect_resolve_direct_url()
        .times(1)
        .returning(|sid| Err(Error::DirectUrlUnavailable(sid.to_string())));
    source.expect_fetch_direct().never();

    let out = collect(TraceTail::new(Arc::new(source), "s1", POLL)).await;
    assert_eq!(out.len(), 1);
    assert!(out[0].starts_with("Could not read the trace for session s1"));
}

#[tokio::test(start_paused = true)]
async fn test_direct_read_failure_ends_tail() {
    let mut source = MockTraceSource::new();
    source
        .expect_fetch_proxy()
        .returning(|_| Err(Error::Network("timeout".into())));
    source
        .expect_resolve_direct_url()
        .returning(|_| Ok("http://minio/b/trace/s1.jsonl".into()));
    source.expect_fetch_direct().times(1).returning(|url| {
        Err(Error::Status {
            status: 403,
            url: url.to_string(),
        })
    });

    let out = collect(TraceTail::new(Arc::new(source), "s1", POLL)).await;
    assert_eq!(out.len(), 1);
    assert!(out[0].contains("HTTP 403"));
}

#[tokio::test(start_paused = true)]
async fn test_offset_and_output_hook() {
    let body = trace(&[
        line("loader", EventType::Trace, "skipped"),
        line("analysis", EventType::Trace, "b"),
        line("api", EventType::End, "done"),
    ]);
    let mut source = MockTraceSource::new();
    source
        .expect_fetch_proxy()
        .returning(move |_| Ok(body.clone()));

    let outputs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&outputs);
    let tail = TraceTail::new(Arc::new(source), "s1", POLL)
        .from_offset(1)
        .on_output(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let out = collect(tail).await;
    assert_eq!(out, vec!["b\n", "**[END]** done\n\n"]);
    assert_eq!(outputs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_drain_short_returns_first_outputs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let body = trace(&[
        line("pipeline", EventType::Start, "go"),
        json!({"timestamp": 2.0, "type": "trace", "session_id": "s1", "node": "n", "step_type": "x", "message": "working"})
            .to_string(),
    ]);
    let mut source = MockTraceSource::new();
    source.expect_fetch_proxy().returning(move |sid| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(Error::NotFound(sid.to_string()))
        } else {
            Ok(body.clone())
        }
    });

    let out = drain_short(&source, "s1", 3, POLL).await;
    assert_eq!(out, vec!["**[START]** go\n\n", "working\n"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_drain_short_gives_up_after_tries() {
    let mut source = MockTraceSource::new();
    source
        .expect_fetch_proxy()
        .times(3)
        .returning(|sid| Err(Error::NotFound(sid.to_string())));

    let started = tokio::time::Instant::now();
    assert!(drain_short(&source, "s1", 3, POLL).await.is_empty());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_drain_short_reads_only_leading_lines() {
    let mut lines: Vec<String> = (0..SHORT_POLL_LINES)
        .map(|_| "not json".to_string())
        .collect();
    lines.push(line("loader", EventType::Trace, "too late"));
    let body = trace(&lines);

    let mut source = MockTraceSource::new();
    source
        .expect_fetch_proxy()
        .times(1)
        .returning(move |_| Ok(body.clone()));

    assert!(drain_short(&source, "s1", 1, POLL).await.is_empty());
}

fn timed(timestamp: f64, node: &str, event_type: EventType, content: &str) -> String {
    let step_type = event_type.as_str().to_string();
    Event::new(
        timestamp,
        "s1",
        node,
        step_type,
        EventFields::new().with_type(event_type).with_content(content),
    )
    .to_json_line()
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_moving_window_resumes_after_last_event() {
    let windows = [
        trace(&[
            timed(1.0, "n", EventType::Trace, "a"),
            timed(2.0, "n", EventType::Trace, "b"),
        ]),
        trace(&[
            timed(2.0, "n", EventType::Trace, "b"),
            timed(3.0, "n", EventType::Trace, "c"),
        ]),
        trace(&[
            timed(4.0, "n", EventType::Trace, "d"),
            timed(5.0, "pipeline", EventType::End, "done"),
        ]),
    ];
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut source = MockTraceSource::new();
    source.expect_fetch_proxy().returning(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(windows[n.min(windows.len() - 1)].clone())
    });

    let mut tail = TraceTail::new(Arc::new(source), "s1", POLL);
    let mut out = Vec::new();
    while let Some(chunk) = tail.next_chunk().await {
        out.push(chunk);
    }
    assert_eq!(out, vec!["a\n", "b\n", "c\n", "d\n", "**[END]** done\n\n"]);
    assert_eq!(tail.offset(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_an_event_not_flushed_yet() {
    let behind = trace(&[timed(1.0, "n", EventType::Trace, "a")]);
    let caught_up = trace(&[
        timed(1.0, "n", EventType::Trace, "a"),
        timed(2.0, "n", EventType::Trace, "b"),
        timed(3.0, "pipeline", EventType::End, "done"),
    ]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut source = MockTraceSource::new();
    source.expect_fetch_proxy().returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(behind.clone())
        } else {
            Ok(caught_up.clone())
        }
    });

    let seen = Event::from_json_line(&timed(2.0, "n", EventType::Trace, "b")).unwrap();
    let tail = TraceTail::new(Arc::new(source), "s1", POLL)
        .from_offset(2)
        .after(seen);
    assert_eq!(collect(tail).await, vec!["**[END]** done\n\n"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
