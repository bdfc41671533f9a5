//! Chat request normalization
//!
//! Pulls the turn-identifying fields out of an OpenAI-style chat body: the
//! conversation id, the id and text of the latest user message, file
//! references, and the streaming flag. Front ends that wrap the real message
//! in a "### Chat History:" prompt block are unwrapped to the last `USER:`
//! line first.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static HISTORY_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<chat_history>(.*)").expect("HISTORY_BLOCK is a compile-time constant")
});
static HISTORY_USER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bUSER:[ \t]*(.+)").expect("HISTORY_USER is a compile-time constant")
});
static FILE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bFILE\s*:\s*(\S+)").expect("FILE_TAG is a compile-time constant")
});
static FILENAME_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bFILENAME\s*:\s*(\S+)").expect("FILENAME_TAG is a compile-time constant")
});
static TAG_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(FILE|FILENAME)\s*:\s*\S+").expect("TAG_NOISE is a compile-time constant")
});
static NUMBERED_FILE_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\S*\d{3,}\S*\.\w+\b").expect("NUMBERED_FILE_NOISE is a compile-time constant")
});

/// Object-key prefix stored uploads live under
pub const UPLOAD_PREFIX: &str = "uploaded/";

const HISTORY_MARKER: &str = "### Chat History:";
const CONVERSATION_KEYS: [&str; 3] = ["conversation_id", "chat_id", "thread_id"];
const ATTACHMENT_KEYS: [&str; 3] = ["files", "attachments", "images"];
const NAME_KEYS: [&str; 3] = ["name", "filename", "file_name"];
const LOCATION_KEYS: [&str; 2] = ["path", "url"];

/// Normalized view of one chat request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// `conversation_id`, `chat_id` or `thread_id`; empty if absent
    pub conversation_id: String,
    /// Id of the latest user message; empty if absent
    pub last_user_id: String,
    /// The user's actual words (history block unwrapped)
    pub user_text: String,
    /// `user_text` with file noise removed; the fingerprint input
    pub query: String,
    /// Explicit `file_path` or a `FILE:` tag
    pub file_path: Option<String>,
    /// `FILENAME:` tag
    pub filename_tag: Option<String>,
    /// Attachment basenames in body and messages, de-duplicated
    pub attachments: Vec<String>,
    /// Whether the caller wants a streamed answer (defaults to `true`)
    pub stream: bool,
}

impl TurnRequest {
    /// Normalize a chat completion body
    #[must_use]
    pub fn from_chat_body(body: &Value) -> Self {
        let empty = Vec::new();
        let messages = body
            .get("messages")
            .and_then(Value::as_array)
            .unwrap_or(&empty);

        let raw_user = messages
            .iter()
            .rev()
            .find(|m| is_user(m))
            .map(|m| message_text(m.get("content")))
            .unwrap_or_default();
        let user_text = extract_history_user(&raw_user).unwrap_or(raw_user);

        let conversation_id = CONVERSATION_KEYS
            .iter()
            .find_map(|k| non_empty_str(body.get(*k)))
            .unwrap_or_default()
            .to_string();

        let file_path = non_empty_str(body.get("file_path"))
            .map(str::to_string)
            .or_else(|| extract_file_tag(&user_text));

        Self {
            conversation_id,
            last_user_id: last_user_id(messages),
            query: normalize_query(&user_text),
            file_path,
            filename_tag: extract_filename_tag(&user_text),
            attachments: attachment_names(body, messages),
            stream: body.get("stream").and_then(Value::as_bool).unwrap_or(true),
            user_text,
        }
    }

    /// Candidate upload names: the `FILENAME:` tag first, then attachments
    #[must_use]
    pub fn candidate_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.filename_tag.iter().cloned().collect();
        for name in &self.attachments {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Explicit reference that already names a stored upload
    #[must_use]
    pub fn object_key(&self) -> Option<&str> {
        self.file_path
            .as_deref()
            .filter(|p| p.starts_with(UPLOAD_PREFIX))
    }
}

fn is_user(message: &Value) -> bool {
    message.get("role").and_then(Value::as_str) == Some("user")
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Message content as text; multi-part content joins its text parts
fn message_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| match p {
                Value::String(s) => Some(s.as_str()),
                Value::Object(o) => o.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn last_user_id(messages: &[Value]) -> String {
    messages
        .iter()
        .rev()
        .filter(|m| is_user(m))
        .find_map(|m| non_empty_str(m.get("id")))
        .unwrap_or_default()
        .to_string()
}

/// Last `USER:` line of a wrapped "### Chat History:" prompt, if the text is one
#[must_use]
pub fn extract_history_user(text: &str) -> Option<String> {
    if !text.contains(HISTORY_MARKER) {
        return None;
    }
    let history = HISTORY_BLOCK.captures(text)?.get(1)?.as_str();
    HISTORY_USER
        .captures_iter(history)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Strip file tags and numbered file names so they don't perturb the fingerprint
#[must_use]
pub fn normalize_query(query: &str) -> String {
    let without_tags = TAG_NOISE.replace_all(query, "");
    let without_files = NUMBERED_FILE_NOISE.replace_all(&without_tags, "");
    without_files.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `FILE: <object key or path>`
#[must_use]
pub fn extract_file_tag(text: &str) -> Option<String> {
    FILE_TAG
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// `FILENAME: <name.ext>`
#[must_use]
pub fn extract_filename_tag(text: &str) -> Option<String> {
    FILENAME_TAG
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Attachment basenames from `files`/`attachments`/`images` in the body and every message
#[must_use]
pub fn attachment_names(body: &Value, messages: &[Value]) -> Vec<String> {
    let mut names = Vec::new();
    for holder in std::iter::once(body).chain(messages) {
        for key in ATTACHMENT_KEYS {
            let Some(items) = holder.get(key).and_then(Value::as_array) else {
                continue;
            };
            for name in items.iter().filter_map(attachment_name) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    names
}

fn attachment_name(item: &Value) -> Option<String> {
    let raw = match item {
        Value::String(s) => s.as_str(),
        Value::Object(o) => named(o).or_else(|| located(o))?,
        _ => return None,
    };
    let without_query = raw.split('?').next().unwrap_or(raw);
    let base = basename(without_query);
    (!base.is_empty()).then(|| base.to_string())
}

fn named(o: &Map<String, Value>) -> Option<&str> {
    NAME_KEYS.iter().find_map(|k| non_empty_str(o.get(*k)))
}

fn located(o: &Map<String, Value>) -> Option<&str> {
    LOCATION_KEYS.iter().find_map(|k| non_empty_str(o.get(*k)))
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests;
