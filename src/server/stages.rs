//! Built-in pipeline stages
//!
//! - `intake`: announces the input and query
//! - `analysis`: posts the run to an external analysis service and records
//!   the events it answers with

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use turnstream_core::{Error, EventFields, EventType, Result, SessionRecorder, Stage, StageContext};

/// Records what the run is about to work on
#[derive(Debug, Default)]
pub struct IntakeStage;

#[async_trait]
impl Stage for IntakeStage {
    fn name(&self) -> &str {
        "intake"
    }

    async fn run(&self, ctx: &StageContext, recorder: &SessionRecorder) -> Result<Value> {
        let content = if ctx.query.is_empty() {
            format!("Input: {}", ctx.file_path)
        } else {
            format!("Input: {}\nQuestion: {}", ctx.file_path, ctx.query)
        };
        recorder.record(
            self.name(),
            "trace",
            EventFields::new()
                .with_type(EventType::Trace)
                .with_content(content),
        );
        Ok(json!({"file_path": ctx.file_path}))
    }
}

/// Calls an analysis service over HTTP.
///
/// The service receives `{session_id, file_path, query, params}`. It may push
/// progress itself through `POST /api/v1/sessions/{id}/events`; anything in
/// an `events` array of its reply is recorded too, and any other reply body is
/// recorded as a single `tool_result`.
#[derive(Debug, Clone)]
pub struct WebhookStage {
    client: reqwest::Client,
    url: String,
}

impl WebhookStage {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn failure(&self, message: impl Into<String>) -> Error {
        Error::Stage {
            stage: self.name().to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Stage for WebhookStage {
    fn name(&self) -> &str {
        "analysis"
    }

    async fn run(&self, ctx: &StageContext, recorder: &SessionRecorder) -> Result<Value> {
        let start = Instant::now();
        debug!(url = %self.url, session_id = %ctx.session_id, "Calling analysis service");

        recorder.record(
            self.name(),
            "tool_call",
            EventFields::new()
                .with_type(EventType::Trace)
                .with_tool_name("analysis_service")
                .with_content(json!({"file_path": ctx.file_path, "query": ctx.query})),
        );

        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "session_id": ctx.session_id,
                "file_path": ctx.file_path,
                "query": ctx.query,
                "params": ctx.params,
            }))
            .send()
            .await
            .map_err(|e| self.failure(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.failure(e.to_string()))?;
        if !status.is_success() {
            return Err(self.failure(format!("HTTP {} from analysis service", status.as_u16())));
        }

        let reply = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));
        let recorded = record_reply(self.name(), &reply, recorder);
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(recorded, duration_ms, "Analysis service answered");

        Ok(json!({"events": recorded, "duration_ms": duration_ms}))
    }
}

/// Record a service reply; returns how many events were recorded
fn record_reply(stage: &str, reply: &Value, recorder: &SessionRecorder) -> usize {
    if let Some(events) = reply.get("events").and_then(Value::as_array) {
        for event in events {
            let node = event.get("node").and_then(Value::as_str).unwrap_or(stage);
            let step_type = event
                .get("step_type")
                .and_then(Value::as_str)
                .unwrap_or("trace");
            recorder.record(node, step_type, fields_from_value(event));
        }
        return events.len();
    }

    recorder.record(
        stage,
        "tool_result",
        EventFields::new()
            .with_type(EventType::Trace)
            .with_tool_name("analysis_service")
            .with_content(reply.clone()),
    );
    1
}

/// Payload of an externally supplied event object
pub fn fields_from_value(event: &Value) -> EventFields {
    let mut object = event.as_object().cloned().unwrap_or_default();
    for key in ["timestamp", "session_id", "node", "step_type"] {
        object.remove(key);
    }
    serde_json::from_value(Value::Object(object)).unwrap_or_else(|_| {
        EventFields::new()
            .with_type(EventType::Trace)
            .with_content(event.clone())
    })
}
