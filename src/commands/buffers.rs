//! `console`, `network`, `cookies`, and `clear` — read/clear handlers over
//! the Event Buffers and the browser's cookie jar.

use serde_json::{Value, json};

use crate::buffers::{ConsoleFilter, NetworkFilter, Slice, filter::parse_status_filters};
use crate::error::AppError;
use crate::ipc::protocol::{ClearParams, ConsoleParams, CookiesParams, NetworkParams};
use crate::supervisor::Supervisor;

fn resolve_slice(head: Option<usize>, tail: Option<usize>, range: Option<(usize, usize)>) -> Option<Slice> {
    if let Some(n) = head {
        Some(Slice::Head(n))
    } else if let Some(n) = tail {
        Some(Slice::Tail(n))
    } else {
        range.map(|(a, b)| Slice::Range(a, b))
    }
}

fn split_csv(value: &Option<String>) -> Option<Vec<String>> {
    value
        .as_ref()
        .map(|s| crate::buffers::filter::parse_token_set(s))
}

/// # Errors
///
/// Returns `AppError::not_found` if the filtered result is empty.
pub async fn console(supervisor: &Supervisor, params: ConsoleParams) -> Result<Value, AppError> {
    let filter = ConsoleFilter {
        types: split_csv(&params.entry_type),
        find: params.find,
        slice: resolve_slice(params.head, params.tail, params.range),
    };
    let entries = supervisor.console_buffer().read(&filter);
    if entries.is_empty() {
        return Err(AppError::not_found("no matching console entries"));
    }
    Ok(json!({ "entries": entries }))
}

/// # Errors
///
/// Returns `AppError::invalid_argument` if `status`/`url` is malformed, or
/// `AppError::not_found` if the filtered result is empty.
pub async fn network(supervisor: &Supervisor, params: NetworkParams) -> Result<Value, AppError> {
    let filter = NetworkFilter {
        types: split_csv(&params.resource_type),
        find: params.find,
        statuses: params.status.as_deref().map(parse_status_filters),
        methods: split_csv(&params.method),
        url_regex: params.url,
        mime: split_csv(&params.mime),
        min_duration: params.min_duration,
        min_size: params.min_size,
        failed_only: params.failed,
        slice: resolve_slice(params.head, params.tail, params.range),
    };
    let entries = supervisor.network_buffer().read(&filter)?;
    if entries.is_empty() {
        return Err(AppError::not_found("no matching network entries"));
    }
    Ok(json!({ "entries": entries }))
}

/// # Errors
///
/// Returns `AppError::not_found` if there is no active session, or a CDP
/// error if `Network.getAllCookies` fails.
pub async fn cookies(supervisor: &Supervisor, params: CookiesParams) -> Result<Value, AppError> {
    let sessions = supervisor.sessions().lock().await;
    let session = sessions
        .active_session()
        .ok_or_else(|| AppError::not_found("no active session"))?;
    let result = session.send_command("Network.getAllCookies", None).await?;
    let mut list = result["cookies"].as_array().cloned().unwrap_or_default();
    if let Some(domain) = &params.domain {
        list.retain(|c| {
            c["domain"]
                .as_str()
                .is_some_and(|d| d == domain.as_str() || d.ends_with(&format!(".{domain}")))
        });
    }
    if list.is_empty() {
        return Err(AppError::not_found("no matching cookies"));
    }
    Ok(json!({ "cookies": list }))
}

/// # Errors
///
/// Returns `AppError::invalid_argument` for an unknown buffer name.
pub async fn clear(supervisor: &Supervisor, params: ClearParams) -> Result<Value, AppError> {
    let mut cleared_paths = Vec::new();
    match params.buffer.as_deref() {
        Some("console") => supervisor.console_buffer().clear(),
        Some("network") => cleared_paths = supervisor.network_buffer().clear(),
        None => {
            supervisor.console_buffer().clear();
            cleared_paths = supervisor.network_buffer().clear();
        }
        Some(other) => {
            return Err(AppError::invalid_argument(format!(
                "unknown buffer: {other} (expected console or network)"
            )));
        }
    }
    for path in cleared_paths {
        let _ = std::fs::remove_file(path);
    }
    Ok(json!({ "cleared": true }))
}
