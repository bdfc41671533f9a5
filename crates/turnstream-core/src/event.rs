//! Event - the immutable record every pipeline stage emits
//!
//! One `Event` is one line of the durable trace and one push frame on the
//! live stream. Besides the fixed header (timestamp, type, session, node,
//! step type) an event carries a handful of well-known optional payload
//! fields and an open map for anything else a stage wants to attach.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Nodes whose `end` event terminates a session's stream
pub const TERMINAL_NODES: [&str; 3] = ["pipeline", "api", "service"];

/// Event types.
///
/// The wire value is a plain lowercase string. Strings this build does not
/// know (`flowchart`, `plot`, `artifact`, ...) are preserved in `Other` so a
/// trace written by a newer producer round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum EventType {
    /// Generic progress record
    #[default]
    Trace,
    /// Intermediate model reasoning
    Thought,
    /// Generated image
    Image,
    /// Generated file or document
    File,
    /// Failure surfaced as data
    Error,
    /// Run started
    Start,
    /// Run finished
    End,
    /// Any other type string
    Other(String),
}

impl EventType {
    /// Returns the string representation of the event type
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Trace => "trace",
            Self::Thought => "thought",
            Self::Image => "image",
            Self::File => "file",
            Self::Error => "error",
            Self::Start => "start",
            Self::End => "end",
            Self::Other(s) => s,
        }
    }

    /// Parse leniently; known names match in any case, unknown strings
    /// become `Other` exactly as written
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "thought" => Self::Thought,
            "image" => Self::Image,
            "file" => Self::File,
            "error" => Self::Error,
            "start" => Self::Start,
            "end" => Self::End,
            _ => Self::Other(s.to_string()),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::parse(s) {
            Self::Other(_) => Err(format!("unknown event type: {s}")),
            known => Ok(known),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Optional payload of a `record` call.
///
/// Everything except the header. Built with the `with_*` methods:
///
/// ```
/// use turnstream_core::{EventFields, EventType};
///
/// let fields = EventFields::new()
///     .with_type(EventType::Thought)
///     .with_thought("look at the residuals first")
///     .with_model("qwen2.5-72b");
/// assert_eq!(fields.event_type, EventType::Thought);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFields {
    /// Event type (defaults to `trace`)
    #[serde(rename = "type", default)]
    pub event_type: EventType,
    /// Model reasoning text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// Tool calls requested by a model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    /// Free-form result object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Model identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    /// Tool name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Textual or structured content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Any additional payload keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventFields {
    /// Empty `trace` payload
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event type
    #[must_use]
    pub fn with_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    /// Set the thought text
    #[must_use]
    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }

    /// Set the tool call list
    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Value) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    /// Set the result object
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Set the model id
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set usage statistics
    #[must_use]
    pub fn with_usage(mut self, usage: Value) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Set the tool name
    #[must_use]
    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Set the content
    #[must_use]
    pub fn with_content(mut self, content: impl Into<Value>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach an arbitrary extra key
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A single recorded event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Seconds since the Unix epoch; strictly increasing within a session
    pub timestamp: f64,
    /// Session identifier
    pub session_id: String,
    /// Emitting node
    pub node: String,
    /// Step type within the node (`tool_call`, `tool_result`, `exception`, ...)
    pub step_type: String,
    /// Type and payload
    #[serde(flatten)]
    pub fields: EventFields,
}

impl Event {
    /// Create an event from its parts
    #[must_use]
    pub fn new(
        timestamp: f64,
        session_id: impl Into<String>,
        node: impl Into<String>,
        step_type: impl Into<String>,
        fields: EventFields,
    ) -> Self {
        Self {
            timestamp,
            session_id: session_id.into(),
            node: node.into(),
            step_type: step_type.into(),
            fields,
        }
    }

    /// Event type shortcut
    #[must_use]
    pub fn event_type(&self) -> &EventType {
        &self.fields.event_type
    }

    /// `end` event from a node that finishes the whole run
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        *self.event_type() == EventType::End
            && TERMINAL_NODES
                .iter()
                .any(|n| n.eq_ignore_ascii_case(&self.node))
    }

    /// Serialize to a single JSON line (no trailing newline)
    pub fn to_json_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a single JSON line
    pub fn from_json_line(line: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Lookup of a payload key that may live in the open map
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.fields.extra.get(key)
    }
}

/// Current wall-clock time as float seconds
#[must_use]
pub fn now_secs() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_roundtrip() {
        for t in [
            EventType::Trace,
            EventType::Thought,
            EventType::Image,
            EventType::File,
            EventType::Error,
            EventType::Start,
            EventType::End,
        ] {
            let parsed: EventType = t.as_str().parse().unwrap();
            assert_eq!(parsed, t);
        }
        assert!("bogus".parse::<EventType>().is_err());
    }

    #[test]
    fn test_unknown_type_keeps_its_spelling() {
        assert_eq!(EventType::parse("END"), EventType::End);
        assert_eq!(EventType::parse("Flowchart"), EventType::Other("Flowchart".into()));

        let line = r#"{"timestamp":1.0,"type":"Flowchart","session_id":"s","node":"viz","step_type":"render"}"#;
        let event = Event::from_json_line(line).unwrap();
        assert!(event.to_json_line().unwrap().contains(r#""type":"Flowchart""#));
    }

    #[test]
    fn test_wire_shape() {
        let event = Event::new(
            12.5,
            "s1",
            "analysis",
            "tool_call",
            EventFields::new()
                .with_tool_name("describe")
                .with_content(serde_json::json!({"column": "age"})),
        );
        let json: Value = serde_json::from_str(&event.to_json_line().unwrap()).unwrap();

        assert_eq!(json["type"], "trace");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["node"], "analysis");
        assert_eq!(json["step_type"], "tool_call");
        assert_eq!(json["tool_name"], "describe");
        assert!(json.get("thought").is_none());
        assert!(json.get("model").is_none());
    }

    #[test]
    fn test_unknown_type_and_extra_keys_survive_parse() {
        let line = r#"{"timestamp":1.0,"type":"flowchart","session_id":"s","node":"viz","step_type":"render","url":"http://x/y.png"}"#;
        let event = Event::from_json_line(line).unwrap();
        assert_eq!(event.event_type(), &EventType::Other("flowchart".into()));
        assert!(event.to_json_line().unwrap().contains(r#""type":"flowchart""#));
        assert_eq!(event.extra("url").and_then(Value::as_str), Some("http://x/y.png"));
    }

    #[test]
    fn test_is_terminal() {
        let end = |node: &str| {
            Event::new(0.0, "s", node, "end", EventFields::new().with_type(EventType::End))
        };
        assert!(end("pipeline").is_terminal());
        assert!(end("API").is_terminal());
        assert!(!end("loader").is_terminal());

        let trace = Event::new(0.0, "s", "pipeline", "end", EventFields::new());
        assert!(!trace.is_terminal());
    }

    #[test]
    fn test_missing_header_is_rejected() {
        assert!(Event::from_json_line(r#"{"type":"trace"}"#).is_err());
        assert!(Event::from_json_line("not json").is_err());
    }
}
