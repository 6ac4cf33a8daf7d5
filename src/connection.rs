//! Browser boundary: resolving a CDP WebSocket endpoint to connect to.
//!
//! The daemon never launches Chrome; it only discovers an already-running
//! instance via `/json/version` and `/json` on `127.0.0.1:<port>`, or
//! connects directly to an explicit `--ws-url`.

use crate::chrome::{TargetInfo, discover_chrome, query_targets, query_version};
use crate::error::AppError;

/// Default Chrome `DevTools` Protocol port.
pub const DEFAULT_CDP_PORT: u16 = 9222;

/// Resolved connection info ready for use by the daemon's startup sequence.
#[derive(Debug)]
pub struct ResolvedConnection {
    pub ws_url: String,
    pub host: String,
    pub port: u16,
}

/// Health-check a connection by querying `/json/version`.
///
/// # Errors
///
/// Returns `AppError` with a `connection-lost` kind if Chrome is unreachable.
pub async fn health_check(host: &str, port: u16) -> Result<(), AppError> {
    query_version(host, port).await.map(|_| ()).map_err(|_| {
        AppError::connection_lost(format!("no reachable Chrome instance at {host}:{port}"))
    })
}

/// Resolve a Chrome connection using the priority chain:
///
/// 1. Explicit `--ws-url`
/// 2. Explicit `--port` (user provided, not the default)
/// 3. Auto-discover (default host:port 9222)
///
/// # Errors
///
/// Returns `AppError` if no Chrome connection can be resolved.
pub async fn resolve_connection(
    host: &str,
    port: Option<u16>,
    ws_url: Option<&str>,
) -> Result<ResolvedConnection, AppError> {
    let default_port = DEFAULT_CDP_PORT;

    if let Some(ws_url) = ws_url {
        let resolved_port =
            extract_port_from_ws_url(ws_url).unwrap_or(port.unwrap_or(default_port));
        return Ok(ResolvedConnection {
            ws_url: ws_url.to_string(),
            host: host.to_string(),
            port: resolved_port,
        });
    }

    if let Some(explicit_port) = port {
        return match query_version(host, explicit_port).await {
            Ok(version) => Ok(ResolvedConnection {
                ws_url: version.ws_debugger_url,
                host: host.to_string(),
                port: explicit_port,
            }),
            Err(_) => Err(AppError::connection_lost(format!(
                "no Chrome instance found on port {explicit_port}"
            ))),
        };
    }

    match discover_chrome(host, default_port).await {
        Ok((ws_url, p)) => Ok(ResolvedConnection {
            ws_url,
            host: host.to_string(),
            port: p,
        }),
        Err(_) => Err(AppError::connection_lost(
            "no Chrome instance found; pass --port or --ws-url, or set WEBCTL_CHROME",
        )),
    }
}

/// Extract port from a WebSocket URL like `ws://host:port/path`.
#[must_use]
pub fn extract_port_from_ws_url(url: &str) -> Option<u16> {
    let without_scheme = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))?;
    let host_port = without_scheme.split('/').next()?;
    let port_str = host_port.rsplit(':').next()?;
    port_str.parse().ok()
}

/// Select a target from a list based on the `--tab` option.
///
/// - `None` → first target with `target_type == "page"`
/// - `Some(value)` → try as numeric index, then as target ID
///
/// This is a pure function for testability.
///
/// # Errors
///
/// Returns `AppError::not_found` if no page-type target exists, or if the
/// specified tab cannot be matched.
pub fn select_target<'a>(
    targets: &'a [TargetInfo],
    tab: Option<&str>,
) -> Result<&'a TargetInfo, AppError> {
    match tab {
        None => targets
            .iter()
            .find(|t| t.target_type == "page")
            .ok_or_else(|| AppError::not_found("no page targets available")),
        Some(value) => {
            if let Ok(index) = value.parse::<usize>() {
                return targets
                    .get(index)
                    .ok_or_else(|| AppError::not_found(format!("tab not found: {value}")));
            }
            targets
                .iter()
                .find(|t| t.id == value)
                .ok_or_else(|| AppError::not_found(format!("tab not found: {value}")))
        }
    }
}

/// Resolve the target tab from the `--tab` option by querying Chrome for targets.
///
/// # Errors
///
/// Returns `AppError` if targets cannot be queried or the specified tab is not found.
pub async fn resolve_target(
    host: &str,
    port: u16,
    tab: Option<&str>,
) -> Result<TargetInfo, AppError> {
    let targets = query_targets(host, port).await?;
    select_target(&targets, tab).cloned()
}
