//! Pipeline - stage contract and the runner that frames a run with events
//!
//! A run always opens with a `start` event and closes with a terminal `end`
//! event from the `pipeline` node, so every consumer (live stream, trace tail,
//! short poll) knows when to stop. A failing stage is caught at its boundary
//! and recorded as an `error` event; the run then stops and still closes.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::event::{EventFields, EventType};
use crate::event_bus::{EventBus, SessionRecorder};

/// Node name used for run framing events
pub const PIPELINE_NODE: &str = "pipeline";

/// Input handed to every stage of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageContext {
    /// Session the run records into
    pub session_id: String,
    /// Object key or path of the input file
    pub file_path: String,
    /// Normalized user query
    pub query: String,
    /// Free-form parameters
    #[serde(default)]
    pub params: Value,
}

impl StageContext {
    /// Context for one run
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        file_path: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            file_path: file_path.into(),
            query: query.into(),
            params: Value::Null,
        }
    }
}

/// One step of a pipeline
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name; used as the `node` of events recorded on its behalf
    fn name(&self) -> &str;

    /// Run the stage, recording progress through `recorder`
    async fn run(&self, ctx: &StageContext, recorder: &SessionRecorder) -> Result<Value>;
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// Session id
    pub session_id: String,
    /// Names of the stages that completed
    pub completed: Vec<String>,
    /// Stage that failed, if any
    pub failed_stage: Option<String>,
    /// Failure text
    pub error: Option<String>,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

impl PipelineOutcome {
    /// Whether every stage completed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs stages in order against the event bus
#[derive(Clone, Default)]
pub struct PipelineRunner {
    stages: Vec<Arc<dyn Stage>>,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("PipelineRunner").field("stages", &names).finish()
    }
}

impl PipelineRunner {
    /// Empty pipeline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Number of stages
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Execute every stage for `ctx.session_id`, then flush the session.
    #[instrument(skip(self, bus, ctx), fields(session_id = %ctx.session_id))]
    pub async fn run(&self, bus: &EventBus, ctx: StageContext) -> PipelineOutcome {
        let started = Instant::now();
        let recorder = bus.recorder(ctx.session_id.clone());

        recorder.record(
            PIPELINE_NODE,
            "start",
            EventFields::new()
                .with_type(EventType::Start)
                .with_content(json!({"file_path": ctx.file_path, "query": ctx.query})),
        );
        info!(stages = self.stages.len(), "Pipeline started");

        let mut completed = Vec::with_capacity(self.stages.len());
        let mut failed_stage = None;
        let mut error = None;

        for stage in &self.stages {
            let name = stage.name().to_string();
            debug!(stage = %name, "Running stage");
            match stage.run(&ctx, &recorder).await {
                Ok(_) => completed.push(name),
                Err(e) => {
                    let message = e.to_string();
                    warn!(stage = %name, error = %message, "Stage failed");
                    recorder.record(
                        &name,
                        "exception",
                        EventFields::new()
                            .with_type(EventType::Error)
                            .with_content(message.clone()),
                    );
                    failed_stage = Some(name);
                    error = Some(message);
                    break;
                }
            }
        }

        let status = if error.is_none() { "done" } else { "failed" };
        recorder.record(
            PIPELINE_NODE,
            "end",
            EventFields::new()
                .with_type(EventType::End)
                .with_content(status),
        );

        if !bus.flush(&ctx.session_id).await {
            warn!("Final trace flush did not complete");
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(status, duration_ms, "Pipeline finished");

        PipelineOutcome {
            session_id: ctx.session_id,
            completed,
            failed_stage,
            error,
            duration_ms,
        }
    }
}
