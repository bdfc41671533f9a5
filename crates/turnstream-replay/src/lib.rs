//! Turnstream Replay - reading sessions back
//!
//! Consumers of a session use this crate to get its events as chat text:
//! - Source: proxy and direct read paths to a durable trace
//! - Tail: pull-based replay of the trace until the terminal event
//! - Live: SSE client with connect and idle timeouts
//! - Relay: live first, trace after

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod live;
pub mod relay;
pub mod source;
pub mod tail;

pub use error::{Error, Result};
pub use live::{LiveConfig, LiveOutcome, LiveStream};
pub use relay::{Relay, RelaySummary, FALLBACK_NOTICE};
pub use source::{HttpTraceSource, StoreTraceSource, TraceSource};
pub use tail::{drain_short, TraceTail, SHORT_POLL_LINES};
