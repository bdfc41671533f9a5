//! Event formatting - renders trace events as chat markdown
//!
//! Used by every consumer that shows a session to a person: the SSE relay,
//! the trace tail and the short poll. Rendering works on the JSON object so
//! payload keys that only live in the open map (`url`, `title`, `message`,
//! `text`, `event`, ...) are honoured.

use serde_json::{Map, Value};

use crate::event::Event;

const TEMP_DIR_PREFIX: &str = "/tmp/tmp";
const UNKNOWN_TOOL: &str = "unknown tool";

/// Render one event, or `None` when it has nothing worth showing
#[must_use]
pub fn format_event(event: &Event) -> Option<String> {
    let value = serde_json::to_value(event).ok()?;
    format_value(&value)
}

/// Render a raw event object
#[must_use]
pub fn format_value(value: &Value) -> Option<String> {
    let evt = value.as_object()?;

    let event_type = lower(evt, "type");
    let step_type = lower(evt, "step_type");
    let legacy_event = lower(evt, "event");

    let content = present(evt, "content");
    let message = present(evt, "message");
    let text = present(evt, "text");
    let result = evt.get("result").and_then(Value::as_object);
    let tool = non_empty(evt.get("tool_name"))
        .or_else(|| result.and_then(|r| non_empty(r.get("tool_name"))));

    // Scratch files written by stages are noise to a reader.
    if [content, message, text].into_iter().any(is_temp_path_only)
        || result.is_some_and(is_temp_path_object)
    {
        return None;
    }

    let url = non_empty(evt.get("url"))
        .or_else(|| non_empty(evt.get("image_url")))
        .or_else(|| result.and_then(|r| non_empty(r.get("url"))))
        .or_else(|| {
            content
                .and_then(Value::as_str)
                .filter(|s| s.starts_with("http://") || s.starts_with("https://") || s.starts_with('/'))
        });

    if let Some(url) = url {
        match event_type.as_str() {
            "flowchart" => return Some(format!("### Flowchart\n\n![]({url})\n\n")),
            "image" | "plot" => {
                let title = non_empty(evt.get("title")).unwrap_or("Image");
                return Some(format!("**{title}**\n\n![]({url})\n\n"));
            }
            "file" | "document" | "artifact" => {
                let name = result
                    .and_then(|r| non_empty(r.get("filename")))
                    .unwrap_or_else(|| url.rsplit('/').next().unwrap_or(url));
                return Some(format!("[Download {name}]({url})\n\n"));
            }
            _ => {}
        }
    }

    let tool_label = tool.unwrap_or(UNKNOWN_TOOL);

    if step_type == "tool_call" || legacy_event == "tool_call" {
        let args = [content, message, text]
            .into_iter()
            .flatten()
            .find(|v| is_structured(v))
            .or_else(|| result.and_then(|r| r.get("args")).filter(|v| is_structured(v)));
        let header = format!("🛠️ **Tool call: {tool_label}**\n\n");
        return Some(match args {
            Some(args) => format!("{header}{}\n", json_block(args)),
            None => header,
        });
    }

    if step_type == "tool_result" || legacy_event == "tool_result" {
        let payload = evt.get("result").filter(|v| !v.is_null()).or(content);
        match payload {
            Some(p) if is_structured(p) => {
                return Some(format!(
                    "✅ **Tool result ({tool_label})**\n\n{}\n",
                    json_block(p)
                ));
            }
            Some(p) if matches!(p, Value::String(_) | Value::Number(_)) => {
                return Some(format!(
                    "✅ **Tool result ({tool_label})**\n\n{}\n\n",
                    plain(p)
                ));
            }
            _ => {}
        }
    }

    if let Some(thought) = present(evt, "thought") {
        return Some(format_thought(evt, thought, content));
    }

    let tagged = ["start", "end", "error", "exception"];
    if tagged.contains(&event_type.as_str()) || tagged.contains(&step_type.as_str()) {
        let rendered = match message.or(text).or(content) {
            Some(body) if is_structured(body) => json_block(body),
            Some(body) => plain(body),
            None => String::new(),
        };
        let tag = if step_type.is_empty() {
            event_type.to_uppercase()
        } else {
            step_type.to_uppercase()
        };
        return Some(format!("**[{tag}]** {rendered}\n\n"));
    }

    match message.or(text).or(content) {
        Some(body) if is_structured(body) => Some(format!("{}\n", json_block(body))),
        Some(body) => Some(format!("{}\n", plain(body))),
        None => {
            let node = non_empty(evt.get("node"))?;
            Some(format!("`{node}` {step_type}\n"))
        }
    }
}

fn format_thought(evt: &Map<String, Value>, thought: &Value, content: Option<&Value>) -> String {
    let model = non_empty(evt.get("model"));
    let tokens = evt
        .get("usage")
        .and_then(Value::as_object)
        .and_then(|u| {
            [u.get("total_tokens"), u.get("total")]
                .into_iter()
                .flatten()
                .find(|v| is_truthy(v))
        })
        .map(plain);

    let parts: Vec<String> = model
        .map(str::to_string)
        .into_iter()
        .chain(tokens.map(|t| format!("tokens={t}")))
        .collect();
    let meta = if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(" | "))
    };

    let thought = plain(thought);
    let mut out = format!("**[THOUGHT]{meta}**\n\n{thought}\n\n");

    if let Some(choice) = content.filter(|c| matches!(c, Value::String(_) | Value::Number(_))) {
        let choice = plain(choice);
        let choice = choice.trim();
        if !choice.is_empty() && choice != thought.trim() {
            out.push_str(&format!("**LLM choice:** {choice}\n\n"));
        }
    }
    out
}

fn lower(evt: &Map<String, Value>, key: &str) -> String {
    evt.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase()
}

fn present<'a>(evt: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    evt.get(key).filter(|v| !v.is_null())
}

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn is_structured(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn is_temp_path_object(obj: &Map<String, Value>) -> bool {
    obj.len() == 1
        && obj
            .get("path")
            .and_then(Value::as_str)
            .is_some_and(|p| p.starts_with(TEMP_DIR_PREFIX))
}

fn is_temp_path_only(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_object)
        .is_some_and(is_temp_path_object)
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_block(value: &Value) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    format!("```json\n{pretty}\n```")
}
