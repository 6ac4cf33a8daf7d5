//! Network buffer: entries keyed by CDP `requestId`, accumulated across the
//! four network lifecycle events and optionally enriched with a response
//! body fetched on `loadingFinished`.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

use crate::cdp::CdpEvent;
use crate::error::AppError;
use crate::session::ManagedSession;

use super::filter::{self, Slice, StatusFilter};

/// Bodies at or under this size are inlined; larger bodies are offloaded to
/// a file under the runtime directory's `bodies/` subdirectory.
pub const DEFAULT_BODY_INLINE_MAX_BYTES: usize = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct NetworkEntry {
    #[serde(skip)]
    pub request_id: String,
    pub session_id: String,
    pub url: String,
    pub method: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub status: Option<u16>,
    #[serde(rename = "statusText")]
    pub status_text: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "requestTime")]
    pub request_time: f64,
    #[serde(rename = "responseTime", skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "requestHeaders")]
    pub request_headers: serde_json::Value,
    #[serde(rename = "responseHeaders")]
    pub response_headers: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(rename = "bodyEncoding", skip_serializing_if = "Option::is_none")]
    pub body_encoding: Option<String>,
    #[serde(rename = "bodyTruncated", skip_serializing_if = "is_false")]
    pub body_truncated: bool,
    #[serde(rename = "bodyPath", skip_serializing_if = "Option::is_none")]
    pub body_path: Option<String>,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl NetworkEntry {
    fn new(request_id: &str, session_id: &str, params: &serde_json::Value) -> Self {
        let request = &params["request"];
        Self {
            request_id: request_id.to_string(),
            session_id: session_id.to_string(),
            url: request["url"].as_str().unwrap_or_default().to_string(),
            method: request["method"].as_str().unwrap_or_default().to_string(),
            resource_type: params["type"].as_str().unwrap_or_default().to_string(),
            status: None,
            status_text: String::new(),
            mime_type: String::new(),
            request_time: params["timestamp"].as_f64().unwrap_or(0.0),
            response_time: None,
            duration: None,
            size: None,
            request_headers: request["headers"].clone(),
            response_headers: serde_json::Value::Null,
            body: None,
            body_encoding: None,
            body_truncated: false,
            body_path: None,
            failed: false,
            error: None,
        }
    }
}

/// Apply a `Network.*` CDP event to an entry, creating it on
/// `requestWillBeSent`. Returns the affected `requestId`, if any.
pub fn apply_event(buffer: &NetworkBuffer, session_id: &str, event: &CdpEvent) -> Option<String> {
    let params = &event.params;
    let request_id = params["requestId"].as_str()?;

    match event.method.as_str() {
        "Network.requestWillBeSent" => {
            let entry = NetworkEntry::new(request_id, session_id, params);
            buffer.insert(entry);
        }
        "Network.responseReceived" => {
            buffer.update(request_id, |entry| {
                let response = &params["response"];
                entry.status = response["status"].as_u64().map(|s| s as u16);
                entry.status_text = response["statusText"].as_str().unwrap_or_default().to_string();
                entry.mime_type = response["mimeType"].as_str().unwrap_or_default().to_string();
                entry.response_headers = response["headers"].clone();
                entry.response_time = params["timestamp"].as_f64();
            });
        }
        "Network.dataReceived" => {
            buffer.update(request_id, |entry| {
                let len = params["dataLength"].as_u64().unwrap_or(0);
                entry.size = Some(entry.size.unwrap_or(0) + len);
            });
        }
        "Network.loadingFinished" => {
            buffer.update(request_id, |entry| {
                if let Some(ts) = params["timestamp"].as_f64() {
                    entry.duration = Some((ts - entry.request_time).max(0.0));
                }
                if let Some(len) = params["encodedDataLength"].as_u64() {
                    entry.size = Some(entry.size.unwrap_or(0).max(len));
                }
            });
        }
        "Network.loadingFailed" => {
            buffer.update(request_id, |entry| {
                entry.failed = true;
                entry.error = params["errorText"].as_str().map(str::to_string);
                if let Some(ts) = params["timestamp"].as_f64() {
                    entry.duration = Some((ts - entry.request_time).max(0.0));
                }
            });
        }
        _ => return None,
    }

    Some(request_id.to_string())
}

/// Check if a MIME type represents a binary resource that should not be
/// UTF-8-inlined even when it fits within the inline threshold.
#[must_use]
pub fn is_binary_mime(mime: &str) -> bool {
    let lower = mime.to_lowercase();
    [
        "image/",
        "audio/",
        "video/",
        "application/octet-stream",
        "application/zip",
        "application/gzip",
        "application/pdf",
        "font/",
        "application/wasm",
    ]
    .iter()
    .any(|prefix| lower.starts_with(prefix))
}

/// Decode a CDP `Network.getResponseBody` result and decide how to attach it
/// to an entry: inline as UTF-8, inline as base64, or offload to disk.
///
/// # Errors
///
/// Returns `AppError::internal` if an over-threshold body cannot be written
/// to `bodies_dir`.
pub fn attach_body(
    entry: &mut NetworkEntry,
    raw_body: &str,
    base64_encoded: bool,
    inline_max_bytes: usize,
    bodies_dir: &Path,
) -> Result<(), AppError> {
    use base64::Engine;

    let decoded_bytes = if base64_encoded {
        base64::engine::general_purpose::STANDARD
            .decode(raw_body)
            .map_err(|e| AppError::internal(format!("failed to decode response body: {e}")))?
    } else {
        raw_body.as_bytes().to_vec()
    };

    if decoded_bytes.len() <= inline_max_bytes {
        match String::from_utf8(decoded_bytes.clone()) {
            Ok(text) => {
                entry.body = Some(text);
                entry.body_encoding = None;
            }
            Err(_) => {
                entry.body = Some(base64::engine::general_purpose::STANDARD.encode(&decoded_bytes));
                entry.body_encoding = Some("base64".to_string());
            }
        }
        entry.body_truncated = false;
        entry.body_path = None;
        return Ok(());
    }

    std::fs::create_dir_all(bodies_dir)?;
    let path = bodies_dir.join(format!("{}.bin", entry.request_id));
    std::fs::write(&path, &decoded_bytes)?;

    entry.body = None;
    entry.body_encoding = None;
    entry.body_truncated = true;
    entry.body_path = Some(path.display().to_string());
    Ok(())
}

/// Fetch a completed request's response body over CDP and attach it to its
/// buffer entry, per the body-offload policy.
///
/// # Errors
///
/// Returns `CdpError`-derived `AppError` if the CDP call fails, or an I/O
/// error if an over-threshold body cannot be written to disk.
pub async fn fetch_and_attach_body(
    session: &ManagedSession,
    buffer: &NetworkBuffer,
    request_id: &str,
    inline_max_bytes: usize,
    bodies_dir: &Path,
) -> Result<(), AppError> {
    let result = session
        .send_command(
            "Network.getResponseBody",
            Some(serde_json::json!({ "requestId": request_id })),
        )
        .await?;

    let raw_body = result["body"].as_str().unwrap_or_default();
    let base64_encoded = result["base64Encoded"].as_bool().unwrap_or(false);

    buffer.try_update(request_id, |entry| {
        attach_body(entry, raw_body, base64_encoded, inline_max_bytes, bodies_dir)
    })
    .unwrap_or(Ok(()))
}

/// Filter criteria for a `network` read.
#[derive(Debug, Clone, Default)]
pub struct NetworkFilter {
    pub types: Option<Vec<String>>,
    pub find: Option<String>,
    pub statuses: Option<Vec<StatusFilter>>,
    pub methods: Option<Vec<String>>,
    pub url_regex: Option<String>,
    pub mime: Option<Vec<String>>,
    pub min_duration: Option<f64>,
    pub min_size: Option<u64>,
    pub failed_only: bool,
    pub slice: Option<Slice>,
}

fn matches(entry: &NetworkEntry, filter: &NetworkFilter) -> Result<bool, AppError> {
    if let Some(types) = &filter.types {
        if !filter::token_set_contains(types, &entry.resource_type) {
            return Ok(false);
        }
    }
    if let Some(find) = &filter.find {
        if !entry.url.to_lowercase().contains(&find.to_lowercase()) {
            return Ok(false);
        }
    }
    if let Some(statuses) = &filter.statuses {
        let Some(code) = entry.status else {
            return Ok(false);
        };
        if !filter::status_matches_any(statuses, code) {
            return Ok(false);
        }
    }
    if let Some(methods) = &filter.methods {
        if !filter::token_set_contains(methods, &entry.method) {
            return Ok(false);
        }
    }
    if let Some(pattern) = &filter.url_regex {
        if !filter::regex_search(pattern, &entry.url)? {
            return Ok(false);
        }
    }
    if let Some(mime) = &filter.mime {
        if !filter::mime_matches_any(mime, &entry.mime_type) {
            return Ok(false);
        }
    }
    if let Some(min_duration) = filter.min_duration {
        if entry.duration.is_none_or(|d| d < min_duration) {
            return Ok(false);
        }
    }
    if let Some(min_size) = filter.min_size {
        if entry.size.is_none_or(|s| s < min_size) {
            return Ok(false);
        }
    }
    if filter.failed_only && !entry.failed {
        return Ok(false);
    }
    Ok(true)
}

/// Bounded FIFO network buffer, keyed by `requestId`, guarded by a single
/// mutex.
#[derive(Debug)]
pub struct NetworkBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct Inner {
    order: VecDeque<String>,
    entries: HashMap<String, NetworkEntry>,
}

impl NetworkBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
        }
    }

    /// Insert a new entry, evicting the oldest if at capacity. Returns the
    /// evicted entry's body path, if it had offloaded one, so the caller can
    /// delete the file.
    pub fn insert(&self, entry: NetworkEntry) -> Option<String> {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut evicted_path = None;
        if guard.entries.contains_key(&entry.request_id) {
            // Re-fired requestWillBeSent (e.g. a redirect hop) updates in place.
            guard.entries.insert(entry.request_id.clone(), entry);
            return None;
        }
        if guard.order.len() >= self.capacity {
            if let Some(oldest) = guard.order.pop_front() {
                if let Some(old_entry) = guard.entries.remove(&oldest) {
                    evicted_path = old_entry.body_path;
                }
            }
        }
        guard.order.push_back(entry.request_id.clone());
        guard.entries.insert(entry.request_id.clone(), entry);
        evicted_path
    }

    /// Mutate an existing entry in place, if present.
    pub fn update(&self, request_id: &str, f: impl FnOnce(&mut NetworkEntry)) {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = guard.entries.get_mut(request_id) {
            f(entry);
        }
    }

    /// Mutate an existing entry in place and return the closure's result,
    /// or `None` if the entry is not present.
    pub fn try_update<T>(&self, request_id: &str, f: impl FnOnce(&mut NetworkEntry) -> T) -> Option<T> {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.entries.get_mut(request_id).map(f)
    }

    #[must_use]
    pub fn entry(&self, request_id: &str) -> Option<NetworkEntry> {
        let guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.entries.get(request_id).cloned()
    }

    /// A consistent, insertion-ordered snapshot of the buffer's contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NetworkEntry> {
        let guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .order
            .iter()
            .filter_map(|id| guard.entries.get(id).cloned())
            .collect()
    }

    /// Whether any in-flight request has been updated within `idle_window`
    /// seconds of `now` without reaching a terminal state — used by the
    /// `ready` command's network-idle condition.
    #[must_use]
    pub fn has_in_flight(&self) -> bool {
        let guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .entries
            .values()
            .any(|e| !e.failed && e.duration.is_none())
    }

    /// Apply a filter (AND across kinds, OR within a kind, slice last).
    ///
    /// # Errors
    ///
    /// Returns `AppError::invalid_argument` if `filter.url_regex` is not a
    /// valid regular expression.
    pub fn read(&self, filter: &NetworkFilter) -> Result<Vec<NetworkEntry>, AppError> {
        let mut out = Vec::new();
        for entry in self.snapshot() {
            if matches(&entry, filter)? {
                out.push(entry);
            }
        }
        Ok(filter::apply_slice(out, filter.slice))
    }

    /// Truncate the buffer. Returns the body paths of evicted entries so the
    /// caller can delete the corresponding files. Idempotent.
    pub fn clear(&self) -> Vec<PathBuf> {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let paths = guard
            .entries
            .values()
            .filter_map(|e| e.body_path.as_ref().map(PathBuf::from))
            .collect();
        guard.order.clear();
        guard.entries.clear();
        paths
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .order
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

    fn request_will_be_sent(id: &str, url: &str, ts: f64) -> CdpEvent {
        CdpEvent {
            method: "Network.requestWillBeSent".into(),
            params: serde_json::json!({
                "requestId": id,
                "timestamp": ts,
                "type": "Document",
                "request": {"url": url, "method": "GET", "headers": {}},
            }),
            session_id: Some("s1".into()),
        }
    }

    #[test]
    fn request_will_be_sent_creates_entry() {
        let buf = NetworkBuffer::new(10);
        let event = request_will_be_sent("r1", "https://a.example/x", 1.0);
        apply_event(&buf, "s1", &event);
        let entry = buf.entry("r1").unwrap();
        assert_eq!(entry.url, "https://a.example/x");
        assert_eq!(entry.method, "GET");
    }

    #[test]
    fn response_received_fills_status_and_mime() {
        let buf = NetworkBuffer::new(10);
        apply_event(&buf, "s1", &request_will_be_sent("r1", "https://a", 1.0));
        let response_event = CdpEvent {
            method: "Network.responseReceived".into(),
            params: serde_json::json!({
                "requestId": "r1",
                "timestamp": 1.2,
                "response": {"status": 200, "statusText": "OK", "mimeType": "text/html", "headers": {}},
            }),
            session_id: Some("s1".into()),
        };
        apply_event(&buf, "s1", &response_event);
        let entry = buf.entry("r1").unwrap();
        assert_eq!(entry.status, Some(200));
        assert_eq!(entry.mime_type, "text/html");
    }

    #[test]
    fn loading_finished_computes_duration() {
        let buf = NetworkBuffer::new(10);
        apply_event(&buf, "s1", &request_will_be_sent("r1", "https://a", 1.0));
        let finished = CdpEvent {
            method: "Network.loadingFinished".into(),
            params: serde_json::json!({"requestId": "r1", "timestamp": 1.5, "encodedDataLength": 128}),
            session_id: Some("s1".into()),
        };
        apply_event(&buf, "s1", &finished);
        let entry = buf.entry("r1").unwrap();
        assert!((entry.duration.unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(entry.size, Some(128));
    }

    #[test]
    fn loading_failed_marks_failed_with_error() {
        let buf = NetworkBuffer::new(10);
        apply_event(&buf, "s1", &request_will_be_sent("r1", "https://a", 1.0));
        let failed = CdpEvent {
            method: "Network.loadingFailed".into(),
            params: serde_json::json!({"requestId": "r1", "timestamp": 1.1, "errorText": "net::ERR_FAILED"}),
            session_id: Some("s1".into()),
        };
        apply_event(&buf, "s1", &failed);
        let entry = buf.entry("r1").unwrap();
        assert!(entry.failed);
        assert_eq!(entry.error.as_deref(), Some("net::ERR_FAILED"));
    }

    #[test]
    fn insert_evicts_oldest_and_reports_its_body_path() {
        let buf = NetworkBuffer::new(2);
        apply_event(&buf, "s1", &request_will_be_sent("r1", "https://a", 1.0));
        apply_event(&buf, "s1", &request_will_be_sent("r2", "https://b", 2.0));
        buf.update("r1", |e| e.body_path = Some("/tmp/bodies/r1.bin".into()));

        let evicted = buf.insert(NetworkEntry::new(
            "r3",
            "s1",
            &serde_json::json!({"timestamp": 3.0, "type": "Document", "request": {"url": "https://c", "method": "GET"}}),
        ));
        assert_eq!(evicted.as_deref(), Some("/tmp/bodies/r1.bin"));
        assert!(buf.entry("r1").is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn attach_body_inlines_utf8_under_threshold() {
        let mut entry = NetworkEntry::new(
            "r1",
            "s1",
            &serde_json::json!({"timestamp": 1.0, "type": "Document", "request": {"url": "https://a", "method": "GET"}}),
        );
        attach_body(&mut entry, "hello world", false, 10_000, Path::new("/tmp/nope")).unwrap();
        assert_eq!(entry.body.as_deref(), Some("hello world"));
        assert!(entry.body_encoding.is_none());
        assert!(!entry.body_truncated);
    }

    #[test]
    fn attach_body_keeps_base64_for_non_utf8() {
        use base64::Engine;
        let mut entry = NetworkEntry::new(
            "r1",
            "s1",
            &serde_json::json!({"timestamp": 1.0, "type": "Image", "request": {"url": "https://a", "method": "GET"}}),
        );
        let binary = vec![0xFF, 0xFE, 0x00, 0x01];
        let encoded = base64::engine::general_purpose::STANDARD.encode(&binary);
        attach_body(&mut entry, &encoded, true, 10_000, Path::new("/tmp/nope")).unwrap();
        assert_eq!(entry.body_encoding.as_deref(), Some("base64"));
        assert!(!entry.body_truncated);
    }

    #[test]
    fn attach_body_offloads_over_threshold_to_disk() {
        let dir = std::env::temp_dir().join(format!("webctl-test-bodies-{}", std::process::id()));
        let mut entry = NetworkEntry::new(
            "r1",
            "s1",
            &serde_json::json!({"timestamp": 1.0, "type": "Document", "request": {"url": "https://a", "method": "GET"}}),
        );
        let big = "x".repeat(20);
        attach_body(&mut entry, &big, false, 10, &dir).unwrap();
        assert!(entry.body_truncated);
        assert!(entry.body.is_none());
        let path = entry.body_path.clone().unwrap();
        assert!(std::path::Path::new(&path).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn is_binary_mime_detects_common_types() {
        assert!(is_binary_mime("image/png"));
        assert!(is_binary_mime("application/pdf"));
        assert!(!is_binary_mime("text/html"));
        assert!(!is_binary_mime("application/json"));
    }

    #[test]
    fn read_filters_by_status_and_min_duration() {
        let buf = NetworkBuffer::new(10);
        apply_event(&buf, "s1", &request_will_be_sent("r1", "https://a", 1.0));
        apply_event(
            &buf,
            "s1",
            &CdpEvent {
                method: "Network.responseReceived".into(),
                params: serde_json::json!({"requestId": "r1", "timestamp": 1.1, "response": {"status": 500, "statusText": "", "mimeType": "", "headers": {}}}),
                session_id: Some("s1".into()),
            },
        );
        apply_event(
            &buf,
            "s1",
            &CdpEvent {
                method: "Network.loadingFinished".into(),
                params: serde_json::json!({"requestId": "r1", "timestamp": 2.0}),
                session_id: Some("s1".into()),
            },
        );

        let filter = NetworkFilter {
            statuses: Some(filter::parse_status_filters("5xx")),
            min_duration: Some(0.5),
            ..Default::default()
        };
        let out = buf.read(&filter).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn clear_returns_body_paths_for_cleanup() {
        let buf = NetworkBuffer::new(10);
        apply_event(&buf, "s1", &request_will_be_sent("r1", "https://a", 1.0));
        buf.update("r1", |e| e.body_path = Some("/tmp/bodies/r1.bin".into()));
        let paths = buf.clear();
        assert_eq!(paths, vec![PathBuf::from("/tmp/bodies/r1.bin")]);
        assert!(buf.is_empty());
    }
}
