//! Shared application state and background pipeline launch

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use turnstream_core::{
    BlobStore, EventBus, EventFields, EventType, PipelineRunner, StageContext,
};
use turnstream_replay::StoreTraceSource;
use turnstream_turns::{StartGuard, TurnCorrelator};

use super::config::AppConfig;
use super::stages::{IntakeStage, WebhookStage};
use super::uploads::UploadRegistry;

/// Node used for failures the service itself reports
pub const API_NODE: &str = "api";

/// Everything the HTTP handlers share
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub bus: EventBus,
    pub store: Arc<dyn BlobStore>,
    pub correlator: Arc<TurnCorrelator>,
    /// Turn-level launch de-duplication
    pub start_guard: Arc<StartGuard>,
    /// Short-window guard for explicit `/analyze` calls
    pub run_guard: Arc<StartGuard>,
    pub runner: Arc<PipelineRunner>,
    /// Stored uploads and turn file resolution
    pub uploads: Arc<UploadRegistry>,
    /// Cancelled on shutdown; every live stream holds a child token
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("bus", &self.bus)
            .field("store", &self.store.name())
            .field("runner", &self.runner)
            .finish()
    }
}

impl AppState {
    /// State with the given store and pipeline. Must run inside a tokio runtime.
    pub fn new(config: AppConfig, store: Arc<dyn BlobStore>, runner: PipelineRunner) -> Self {
        let bus = EventBus::new(config.bus.clone(), Arc::clone(&store));
        Self {
            correlator: Arc::new(TurnCorrelator::new(
                config.turns.join_window(),
                config.turns.session_prefix.clone(),
            )),
            start_guard: Arc::new(StartGuard::new(config.turns.start_window())),
            run_guard: Arc::new(StartGuard::new(config.pipeline.run_guard())),
            runner: Arc::new(runner),
            uploads: Arc::new(UploadRegistry::new(
                Arc::clone(&store),
                config.turns.session_prefix.clone(),
                config.uploads.webui_dir.clone(),
                config.uploads.prefer_ext.clone(),
            )),
            shutdown: CancellationToken::new(),
            config: Arc::new(config),
            bus,
            store,
        }
    }

    /// State wired from configuration alone
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let store = config.storage.build_store()?;
        let runner = build_runner(&config)?;
        Ok(Self::new(config, store, runner))
    }

    /// Trace reader over this service's own store
    pub fn trace_source(&self) -> StoreTraceSource {
        StoreTraceSource::new(Arc::clone(&self.store), self.bus.config().trace_prefix.clone())
    }

    /// Run the pipeline for `ctx` in the background.
    ///
    /// A run that dies outside the stage boundary (a panic) is still closed
    /// with an `error` and a terminal `end` event from the `api` node.
    pub fn launch(&self, ctx: StageContext) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let runner = Arc::clone(&self.runner);
        let session_id = ctx.session_id.clone();
        info!(session_id = %session_id, file_path = %ctx.file_path, "Launching pipeline");

        tokio::spawn(async move {
            let run_bus = bus.clone();
            let outcome = tokio::spawn(async move { runner.run(&run_bus, ctx).await }).await;
            if let Err(e) = outcome {
                error!(session_id = %session_id, error = %e, "Pipeline task failed");
                record_failure(&bus, &session_id, &format!("pipeline task failed: {e}")).await;
            }
        })
    }
}

/// Record a service-level failure and close the session
pub async fn record_failure(bus: &EventBus, session_id: &str, message: &str) {
    bus.record(
        session_id,
        API_NODE,
        "exception",
        EventFields::new()
            .with_type(EventType::Error)
            .with_content(message),
    );
    bus.record(
        session_id,
        API_NODE,
        "end",
        EventFields::new()
            .with_type(EventType::End)
            .with_content("failed"),
    );
    bus.flush(session_id).await;
}

fn build_runner(config: &AppConfig) -> Result<PipelineRunner> {
    let mut runner = PipelineRunner::new().with_stage(Arc::new(IntakeStage));
    if let Some(url) = &config.pipeline.webhook_url {
        let stage = WebhookStage::new(url.clone(), config.pipeline.webhook_timeout())?;
        runner = runner.with_stage(Arc::new(stage));
        info!(url = %url, "Analysis webhook stage enabled");
    }
    Ok(runner)
}
