//! Turnstream Core - session event bus and delivery
//!
//! This crate provides the in-process event plumbing for turnstream:
//! - Event: the record every pipeline stage emits
//! - EventBus: per-session ordered log and delivery queue
//! - Sink: durable JSONL traces in a blob store
//! - Delivery: the per-connection push loop with heartbeats
//! - Format: chat markdown rendering of events
//! - Pipeline: stage contract and run framing

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
pub mod delivery;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod format;
pub mod pipeline;
pub mod sink;

pub use blob::{
    artifact_prefix, join_key, trace_key, BlobStore, FsBlobStore, HttpBlobStore, MemoryBlobStore,
};
pub use delivery::{DeliveryConfig, Frame, StreamDelivery};
pub use error::{Error, Result};
pub use event::{now_secs, Event, EventFields, EventType, TERMINAL_NODES};
pub use event_bus::{BusConfig, EventBus, FlushOrder, SessionQueue, SessionRecorder};
pub use format::{format_event, format_value};
pub use pipeline::{PipelineOutcome, PipelineRunner, Stage, StageContext, PIPELINE_NODE};
pub use sink::{DurableSink, Snapshot};
