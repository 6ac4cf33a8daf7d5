//! Console buffer: a bounded, insertion-ordered sequence of console entries,
//! populated by `Runtime.consoleAPICalled`/`Runtime.exceptionThrown` handlers
//! registered by the Session Manager.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

use crate::cdp::CdpEvent;

use super::filter::{self, Slice};

/// Maximum stack frames retained per entry, matching the reference CLI's
/// detail-view cap.
const MAX_STACK_FRAMES: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct StackFrame {
    pub file: String,
    pub line: u64,
    pub column: u64,
    #[serde(rename = "functionName")]
    pub function_name: String,
}

/// A single console entry, keyed implicitly by insertion order.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleEntry {
    pub session_id: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub text: String,
    pub args: Vec<String>,
    /// Milliseconds since epoch.
    pub timestamp: u64,
    pub url: String,
    pub line: u64,
    pub column: u64,
    #[serde(rename = "stackTrace", skip_serializing_if = "Vec::is_empty")]
    pub stack_trace: Vec<StackFrame>,
}

/// Canonicalize a CDP console type to the daemon's vocabulary: `log, debug,
/// info, error, warning`. `Runtime.consoleAPICalled` for `console.warn(...)`
/// carries type `"warning"` already; some call sites pass the shorthand
/// `"warn"`, which is canonicalized here.
#[must_use]
pub fn canonicalize_type(cdp_type: &str) -> String {
    match cdp_type {
        "warn" => "warning".to_string(),
        other => other.to_string(),
    }
}

/// Flatten CDP `RemoteObject` console args into their stringified form.
#[must_use]
pub fn stringify_args(args: &[serde_json::Value]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            if let Some(s) = arg["value"].as_str() {
                return s.to_string();
            }
            if let Some(v) = arg.get("value") {
                if !v.is_null() {
                    return serde_json::to_string(v).unwrap_or_default();
                }
            }
            if let Some(desc) = arg["description"].as_str() {
                return desc.to_string();
            }
            if arg["type"].as_str() == Some("undefined") {
                return "undefined".to_string();
            }
            serde_json::to_string(arg).unwrap_or_default()
        })
        .collect()
}

fn extract_stack_trace(stack_trace: &serde_json::Value) -> Vec<StackFrame> {
    let Some(call_frames) = stack_trace["callFrames"].as_array() else {
        return Vec::new();
    };
    call_frames
        .iter()
        .take(MAX_STACK_FRAMES)
        .map(|f| StackFrame {
            file: f["url"].as_str().unwrap_or_default().to_string(),
            line: f["lineNumber"].as_u64().unwrap_or(0),
            column: f["columnNumber"].as_u64().unwrap_or(0),
            function_name: f["functionName"].as_str().unwrap_or_default().to_string(),
        })
        .collect()
}

/// Convert a CDP timestamp (milliseconds since epoch, as delivered by
/// `Runtime.consoleAPICalled`/`exceptionThrown`) truncated to an integer.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn timestamp_ms(ts: f64) -> u64 {
    ts as u64
}

/// Build a [`ConsoleEntry`] from a `Runtime.consoleAPICalled` event.
#[must_use]
pub fn entry_from_console_api_called(session_id: &str, params: &serde_json::Value) -> ConsoleEntry {
    let cdp_type = params["type"].as_str().unwrap_or("log");
    let args = params["args"].as_array().cloned().unwrap_or_default();
    let text = stringify_args(&args).join(" ");
    let (url, line, column) = params["stackTrace"]["callFrames"]
        .as_array()
        .and_then(|frames| frames.first())
        .map_or((String::new(), 0, 0), |f| {
            (
                f["url"].as_str().unwrap_or_default().to_string(),
                f["lineNumber"].as_u64().unwrap_or(0),
                f["columnNumber"].as_u64().unwrap_or(0),
            )
        });

    ConsoleEntry {
        session_id: session_id.to_string(),
        entry_type: canonicalize_type(cdp_type),
        text,
        args: stringify_args(&args),
        timestamp: timestamp_ms(params["timestamp"].as_f64().unwrap_or(0.0)),
        url,
        line,
        column,
        stack_trace: Vec::new(),
    }
}

/// Build a synthesized error [`ConsoleEntry`] from a `Runtime.exceptionThrown`
/// event.
#[must_use]
pub fn entry_from_exception_thrown(session_id: &str, params: &serde_json::Value) -> ConsoleEntry {
    let details = &params["exceptionDetails"];
    let text = details["exception"]["description"]
        .as_str()
        .or_else(|| details["text"].as_str())
        .unwrap_or("Uncaught exception")
        .to_string();
    let stack_trace = extract_stack_trace(&details["stackTrace"]);

    ConsoleEntry {
        session_id: session_id.to_string(),
        entry_type: "error".to_string(),
        text,
        args: Vec::new(),
        timestamp: timestamp_ms(params["timestamp"].as_f64().unwrap_or(0.0)),
        url: details["url"].as_str().unwrap_or_default().to_string(),
        line: details["lineNumber"].as_u64().unwrap_or(0),
        column: details["columnNumber"].as_u64().unwrap_or(0),
        stack_trace,
    }
}

/// Apply a raw CDP event to a console entry, if it is one this buffer cares
/// about. Returns `None` for events that don't produce a console entry.
#[must_use]
pub fn entry_from_event(session_id: &str, event: &CdpEvent) -> Option<ConsoleEntry> {
    match event.method.as_str() {
        "Runtime.consoleAPICalled" => Some(entry_from_console_api_called(session_id, &event.params)),
        "Runtime.exceptionThrown" => Some(entry_from_exception_thrown(session_id, &event.params)),
        _ => None,
    }
}

/// Filter criteria for a `console` read, composed with AND across kinds and
/// OR within a kind; the slice is applied last.
#[derive(Debug, Clone, Default)]
pub struct ConsoleFilter {
    pub types: Option<Vec<String>>,
    pub find: Option<String>,
    pub slice: Option<Slice>,
}

fn matches(entry: &ConsoleEntry, filter: &ConsoleFilter) -> bool {
    if let Some(types) = &filter.types {
        if !filter::token_set_contains(types, &entry.entry_type) {
            return false;
        }
    }
    if let Some(find) = &filter.find {
        if !entry.text.to_lowercase().contains(&find.to_lowercase()) {
            return false;
        }
    }
    true
}

/// Bounded FIFO console buffer, guarded by a single mutex.
#[derive(Debug)]
pub struct ConsoleBuffer {
    entries: Mutex<VecDeque<ConsoleEntry>>,
    capacity: usize,
}

impl ConsoleBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest if the buffer is at capacity.
    pub fn push(&self, entry: ConsoleEntry) {
        let mut guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(entry);
    }

    /// A consistent, copy-on-read snapshot of the buffer's current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConsoleEntry> {
        let guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.iter().cloned().collect()
    }

    /// Apply a filter (AND across kinds, OR within a kind, slice last).
    #[must_use]
    pub fn read(&self, filter: &ConsoleFilter) -> Vec<ConsoleEntry> {
        let filtered: Vec<ConsoleEntry> = self
            .snapshot()
            .into_iter()
            .filter(|e| matches(e, filter))
            .collect();
        filter::apply_slice(filtered, filter.slice)
    }

    /// Truncate the buffer. Idempotent.
    pub fn clear(&self) {
        let mut guard = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(entry_type: &str, text: &str) -> ConsoleEntry {
        ConsoleEntry {
            session_id: "s1".into(),
            entry_type: entry_type.into(),
            text: text.into(),
            args: vec![text.into()],
            timestamp: 0,
            url: "https://example.com".into(),
            line: 1,
            column: 1,
            stack_trace: Vec::new(),
        }
    }

    #[test]
    fn canonicalizes_warn_to_warning() {
        assert_eq!(canonicalize_type("warn"), "warning");
        assert_eq!(canonicalize_type("error"), "error");
    }

    #[test]
    fn stringify_args_handles_primitives_and_objects() {
        let args = vec![
            serde_json::json!({"type": "string", "value": "hello"}),
            serde_json::json!({"type": "number", "value": 42}),
            serde_json::json!({"type": "undefined"}),
        ];
        let out = stringify_args(&args);
        assert_eq!(out, vec!["hello", "42", "undefined"]);
    }

    #[test]
    fn push_evicts_oldest_at_capacity() {
        let buf = ConsoleBuffer::new(2);
        buf.push(sample("log", "one"));
        buf.push(sample("log", "two"));
        buf.push(sample("log", "three"));
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].text, "two");
        assert_eq!(snap[1].text, "three");
    }

    #[test]
    fn clear_truncates_to_zero() {
        let buf = ConsoleBuffer::new(10);
        buf.push(sample("log", "a"));
        buf.clear();
        assert!(buf.is_empty());
    }

    #[test]
    fn read_filters_by_type_and_find_with_and_semantics() {
        let buf = ConsoleBuffer::new(10);
        buf.push(sample("error", "boom happened"));
        buf.push(sample("log", "boom happened"));
        buf.push(sample("error", "all good"));

        let filter = ConsoleFilter {
            types: Some(filter::parse_token_set("error")),
            find: Some("boom".into()),
            slice: None,
        };
        let out = buf.read(&filter);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "boom happened");
    }

    #[test]
    fn read_applies_tail_slice_last() {
        let buf = ConsoleBuffer::new(10);
        for i in 0..5 {
            buf.push(sample("log", &format!("line {i}")));
        }
        let filter = ConsoleFilter {
            types: None,
            find: None,
            slice: Some(Slice::Tail(2)),
        };
        let out = buf.read(&filter);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "line 3");
        assert_eq!(out[1].text, "line 4");
    }

    #[test]
    fn entry_from_console_api_called_extracts_fields() {
        let params = serde_json::json!({
            "type": "warning",
            "timestamp": 1_700_000_000_000.0_f64,
            "args": [{"type": "string", "value": "careful"}],
            "stackTrace": {"callFrames": [{"url": "https://a", "lineNumber": 3, "columnNumber": 4}]}
        });
        let entry = entry_from_console_api_called("s1", &params);
        assert_eq!(entry.entry_type, "warning");
        assert_eq!(entry.text, "careful");
        assert_eq!(entry.url, "https://a");
        assert_eq!(entry.line, 3);
        assert_eq!(entry.column, 4);
    }

    #[test]
    fn entry_from_exception_thrown_is_error_type() {
        let params = serde_json::json!({
            "timestamp": 1_700_000_000_000.0_f64,
            "exceptionDetails": {
                "text": "Uncaught",
                "url": "https://a/app.js",
                "lineNumber": 10,
                "columnNumber": 2,
                "exception": {"description": "TypeError: boom"},
                "stackTrace": {"callFrames": []}
            }
        });
        let entry = entry_from_exception_thrown("s1", &params);
        assert_eq!(entry.entry_type, "error");
        assert_eq!(entry.text, "TypeError: boom");
        assert_eq!(entry.url, "https://a/app.js");
    }

    #[test]
    fn entry_from_event_ignores_unrelated_methods() {
        let event = CdpEvent {
            method: "Page.loadEventFired".into(),
            params: serde_json::json!({}),
            session_id: Some("s1".into()),
        };
        assert!(entry_from_event("s1", &event).is_none());
    }
}
