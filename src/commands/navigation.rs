//! `navigate`, `reload`, `back`, `forward`, `ready` — the navigation and
//! wait-condition handlers.

use serde_json::{Value, json};
use tokio::time::{Duration, Instant};

use crate::error::AppError;
use crate::ipc::protocol::{NavigateParams, ReadyParams, ReloadParams, WaitParams};
use crate::supervisor::Supervisor;

const DEFAULT_NAVIGATE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_READY_TIMEOUT_MS: u64 = 30_000;
const POLL_INTERVAL_MS: u64 = 100;
const NETWORK_IDLE_POLL_MS: u64 = 50;
const NETWORK_IDLE_WINDOW_MS: u64 = 500;

/// Normalize a navigation target: no scheme gets `http://` for
/// `localhost`/`127.0.0.1` (with or without a port), `https://` otherwise.
#[must_use]
pub fn normalize_url(input: &str) -> String {
    if input.contains("://") {
        return input.to_string();
    }
    let host = input.split('/').next().unwrap_or(input);
    let host_only = host.split(':').next().unwrap_or(host);
    if host_only == "localhost" || host_only == "127.0.0.1" {
        format!("http://{input}")
    } else {
        format!("https://{input}")
    }
}

async fn current_page(supervisor: &Supervisor) -> Result<(String, String), AppError> {
    let sessions = supervisor.sessions().lock().await;
    let page = sessions
        .active_page()
        .ok_or_else(|| AppError::not_found("no active session"))?;
    Ok((page.id.clone(), page.url.clone()))
}

async fn page_snapshot(supervisor: &Supervisor, session_id: &str) -> Result<Value, AppError> {
    let sessions = supervisor.sessions().lock().await;
    let session = sessions
        .session(session_id)
        .ok_or_else(|| AppError::not_found("no active session"))?;
    let result = session
        .send_command("Runtime.evaluate", Some(json!({
            "expression": "document.title",
            "returnByValue": true,
        })))
        .await?;
    let title = result["result"]["value"].as_str().unwrap_or_default();
    let page = sessions
        .active_page()
        .ok_or_else(|| AppError::not_found("no active session"))?;
    Ok(json!({ "url": page.url, "title": title, "status": page.status }))
}

/// # Errors
///
/// Returns `AppError` on an invalid argument, a missing active session, a
/// CDP-level failure, or a deadline if `wait` times out.
pub async fn navigate(supervisor: &Supervisor, params: NavigateParams) -> Result<Value, AppError> {
    if params.url.trim().is_empty() {
        return Err(AppError::invalid_argument("url is required"));
    }
    let url = normalize_url(&params.url);
    let timeout = Duration::from_millis(params.timeout.unwrap_or(DEFAULT_NAVIGATE_TIMEOUT_MS));

    let session_id = {
        let sessions = supervisor.sessions().lock().await;
        sessions
            .active_session()
            .map(crate::session::ManagedSession::session_id)
            .map(str::to_string)
            .ok_or_else(|| AppError::not_found("no active session"))?
    };

    let load_rx = if params.wait {
        let sessions = supervisor.sessions().lock().await;
        let session = sessions.session(&session_id).unwrap();
        Some(session.subscribe("Page.loadEventFired").await?)
    } else {
        None
    };

    {
        let sessions = supervisor.sessions().lock().await;
        let session = sessions.session(&session_id).unwrap();
        session
            .send_command("Page.navigate", Some(json!({ "url": url })))
            .await?;
    }

    if let Some(mut rx) = load_rx {
        tokio::time::timeout(timeout, rx.recv())
            .await
            .map_err(|_| AppError::deadline("navigation did not reach load within timeout"))?;
    }

    supervisor.note_active_url(&url).await;
    page_snapshot(supervisor, &session_id).await
}

/// # Errors
///
/// Returns `AppError` on a missing active session or CDP failure.
pub async fn reload(supervisor: &Supervisor, params: ReloadParams) -> Result<Value, AppError> {
    let timeout = Duration::from_millis(params.timeout.unwrap_or(DEFAULT_NAVIGATE_TIMEOUT_MS));
    let (session_id, _) = current_page(supervisor).await?;

    let load_rx = if params.wait {
        let sessions = supervisor.sessions().lock().await;
        let session = sessions.session(&session_id).unwrap();
        Some(session.subscribe("Page.loadEventFired").await?)
    } else {
        None
    };

    {
        let sessions = supervisor.sessions().lock().await;
        let session = sessions.session(&session_id).unwrap();
        session
            .send_command("Page.reload", Some(json!({ "ignoreCache": true })))
            .await?;
    }

    if let Some(mut rx) = load_rx {
        tokio::time::timeout(timeout, rx.recv())
            .await
            .map_err(|_| AppError::deadline("reload did not reach load within timeout"))?;
    }

    page_snapshot(supervisor, &session_id).await
}

async fn navigate_history(
    supervisor: &Supervisor,
    params: WaitParams,
    delta: i32,
) -> Result<Value, AppError> {
    let (session_id, _) = current_page(supervisor).await?;
    let timeout = Duration::from_millis(params.timeout.unwrap_or(DEFAULT_NAVIGATE_TIMEOUT_MS));

    let entries = {
        let sessions = supervisor.sessions().lock().await;
        let session = sessions.session(&session_id).unwrap();
        session.send_command("Page.getNavigationHistory", None).await?
    };
    let current_index = entries["currentIndex"].as_i64().unwrap_or(0);
    let list = entries["entries"].as_array().cloned().unwrap_or_default();
    let target_index = current_index + i64::from(delta);
    if target_index < 0 || target_index as usize >= list.len() {
        let message = if delta < 0 { "No previous page" } else { "No next page" };
        return Err(AppError::not_found(message));
    }
    #[allow(clippy::cast_sign_loss)]
    let entry_id = list[target_index as usize]["id"].clone();

    let load_rx = if params.wait {
        let sessions = supervisor.sessions().lock().await;
        let session = sessions.session(&session_id).unwrap();
        Some(session.subscribe("Page.loadEventFired").await?)
    } else {
        None
    };

    {
        let sessions = supervisor.sessions().lock().await;
        let session = sessions.session(&session_id).unwrap();
        session
            .send_command(
                "Page.navigateToHistoryEntry",
                Some(json!({ "entryId": entry_id })),
            )
            .await?;
    }

    if let Some(mut rx) = load_rx {
        tokio::time::timeout(timeout, rx.recv())
            .await
            .map_err(|_| AppError::deadline("history navigation did not reach load within timeout"))?;
    }

    page_snapshot(supervisor, &session_id).await
}

/// # Errors
///
/// Returns `AppError::not_found` if there is no earlier history entry.
pub async fn back(supervisor: &Supervisor, params: WaitParams) -> Result<Value, AppError> {
    navigate_history(supervisor, params, -1).await
}

/// # Errors
///
/// Returns `AppError::not_found` if there is no later history entry.
pub async fn forward(supervisor: &Supervisor, params: WaitParams) -> Result<Value, AppError> {
    navigate_history(supervisor, params, 1).await
}

/// Poll every 100ms (50ms for network idle) until the requested condition
/// holds or the deadline elapses.
///
/// # Errors
///
/// Returns `AppError::deadline` if the condition never holds in time.
pub async fn ready(supervisor: &Supervisor, params: ReadyParams) -> Result<Value, AppError> {
    let timeout = Duration::from_millis(params.timeout.unwrap_or(DEFAULT_READY_TIMEOUT_MS));
    let deadline = Instant::now() + timeout;

    if params.network_idle {
        let mut idle_since: Option<Instant> = None;
        loop {
            let network = supervisor.network_buffer();
            if network.has_in_flight() {
                idle_since = None;
            } else if idle_since.is_none() {
                idle_since = Some(Instant::now());
            }
            if let Some(since) = idle_since {
                if since.elapsed() >= Duration::from_millis(NETWORK_IDLE_WINDOW_MS) {
                    return Ok(json!({ "ready": true, "condition": "network_idle" }));
                }
            }
            if Instant::now() >= deadline {
                return Err(AppError::deadline("network did not go idle in time"));
            }
            tokio::time::sleep(Duration::from_millis(NETWORK_IDLE_POLL_MS)).await;
        }
    }

    if let Some(selector) = &params.selector {
        loop {
            let found = eval_truthy(supervisor, &format!("!!document.querySelector({selector:?})")).await?;
            if found {
                return Ok(json!({ "ready": true, "condition": "selector" }));
            }
            if Instant::now() >= deadline {
                return Err(AppError::deadline(format!("selector {selector} never appeared")));
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    if let Some(expr) = &params.expr {
        loop {
            if eval_truthy(supervisor, expr).await? {
                return Ok(json!({ "ready": true, "condition": "eval" }));
            }
            if Instant::now() >= deadline {
                return Err(AppError::deadline("eval expression never became truthy"));
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    loop {
        if eval_truthy(supervisor, "document.readyState === 'complete'").await? {
            return Ok(json!({ "ready": true, "condition": "load" }));
        }
        if Instant::now() >= deadline {
            return Err(AppError::deadline("page did not finish loading in time"));
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}

async fn eval_truthy(supervisor: &Supervisor, expr: &str) -> Result<bool, AppError> {
    let sessions = supervisor.sessions().lock().await;
    let session = sessions
        .active_session()
        .ok_or_else(|| AppError::not_found("no active session"))?;
    let result = session
        .send_command(
            "Runtime.evaluate",
            Some(json!({ "expression": expr, "returnByValue": true })),
        )
        .await?;
    Ok(result["result"]["value"].as_bool().unwrap_or(false))
}
