//! `html`, `css`, `screenshot`, `eval` — DOM/JS inspection and capture
//! handlers.

use base64::Engine;
use serde_json::{Value, json};

use crate::error::AppError;
use crate::ipc::protocol::{CssParams, EvalParams, HtmlParams, ScreenshotParams};
use crate::session::ManagedSession;
use crate::supervisor::Supervisor;

const DEFAULT_EVAL_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CONTEXT_LINES: usize = 3;

/// Split `text` into lines, compute an inclusive `[i-before, i+after]`
/// window per line matching `find`, merge overlapping/adjacent windows in
/// order, and join the result with a literal `--` separator line between
/// non-adjacent windows. Returns `None` if `find` matches no line.
fn find_with_context(text: &str, find: &str, before: usize, after: usize) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut windows: Vec<(usize, usize)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if line.contains(find) {
            let start = i.saturating_sub(before);
            let end = (i + after).min(lines.len().saturating_sub(1));
            windows.push((start, end));
        }
    }

    if windows.is_empty() {
        return None;
    }

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in windows {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end + 1 => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }

    let sections: Vec<String> = merged
        .into_iter()
        .map(|(start, end)| lines[start..=end].join("\n"))
        .collect();
    Some(sections.join("\n--\n"))
}

async fn root_node_id(session: &ManagedSession) -> Result<i64, AppError> {
    let doc = session.send_command("DOM.getDocument", None).await?;
    doc["root"]["nodeId"]
        .as_i64()
        .ok_or_else(|| AppError::internal("DOM.getDocument missing root nodeId"))
}

async fn query_selector(session: &ManagedSession, selector: &str) -> Result<i64, AppError> {
    let root = root_node_id(session).await?;
    let result = session
        .send_command(
            "DOM.querySelector",
            Some(json!({ "nodeId": root, "selector": selector })),
        )
        .await?;
    result["nodeId"]
        .as_i64()
        .filter(|&id| id > 0)
        .ok_or_else(|| AppError::not_found(format!("no element matches {selector}")))
}

async fn query_selector_all(session: &ManagedSession, selector: &str) -> Result<Vec<i64>, AppError> {
    let root = root_node_id(session).await?;
    let result = session
        .send_command(
            "DOM.querySelectorAll",
            Some(json!({ "nodeId": root, "selector": selector })),
        )
        .await?;
    let ids = result["nodeIds"]
        .as_array()
        .map(|arr| arr.iter().filter_map(serde_json::Value::as_i64).collect())
        .unwrap_or_default();
    Ok(ids)
}

/// `tag`, `id`, and `class` attributes of a node, as reported by
/// `DOM.describeNode`.
struct NodeShape {
    tag: String,
    id: Option<String>,
    class: Option<String>,
}

async fn describe_node(session: &ManagedSession, node_id: i64) -> Result<NodeShape, AppError> {
    let result = session
        .send_command("DOM.describeNode", Some(json!({ "nodeId": node_id })))
        .await?;
    let node = &result["node"];
    let tag = node["nodeName"].as_str().unwrap_or_default().to_lowercase();
    let mut id = None;
    let mut class = None;
    if let Some(attrs) = node["attributes"].as_array() {
        let mut iter = attrs.iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            match key.as_str() {
                Some("id") => id = value.as_str().map(str::to_string).filter(|s| !s.is_empty()),
                Some("class") => class = value.as_str().map(str::to_string).filter(|s| !s.is_empty()),
                _ => {}
            }
        }
    }
    Ok(NodeShape { tag, id, class })
}

/// Derive a stable per-element identifier: a sanitized non-empty `#id`,
/// else the element's first class with a 1-based occurrence index
/// (`.class:N`), else its tag name with a 1-based occurrence index
/// (`tag:N`). `seen` tracks occurrence counts across a single multi-element
/// result set, keyed by the class/tag name used.
fn selector_identifier(shape: &NodeShape, seen: &mut std::collections::HashMap<String, usize>) -> String {
    if let Some(id) = &shape.id {
        let sanitized: String = id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        if !sanitized.is_empty() {
            return format!("#{sanitized}");
        }
    }

    if let Some(class) = shape.class.as_deref().and_then(|c| c.split_whitespace().next()) {
        let n = seen.entry(format!(".{class}")).or_insert(0);
        *n += 1;
        return format!(".{class}:{n}");
    }

    let tag = if shape.tag.is_empty() { "node" } else { shape.tag.as_str() };
    let n = seen.entry(tag.to_string()).or_insert(0);
    *n += 1;
    format!("{tag}:{n}")
}

/// Attach a `selector_identifier` header to each element's outer HTML and
/// join the results with a literal `--` separator line, per the
/// multi-element `html --selector` output shape.
fn join_element_segments(elements: &[(NodeShape, String)]) -> String {
    let mut seen = std::collections::HashMap::new();
    elements
        .iter()
        .map(|(shape, element_html)| {
            let identifier = selector_identifier(shape, &mut seen);
            format!("{identifier}\n{element_html}")
        })
        .collect::<Vec<_>>()
        .join("\n--\n")
}

async fn outer_html(session: &ManagedSession, node_id: i64) -> Result<String, AppError> {
    let result = session
        .send_command("DOM.getOuterHTML", Some(json!({ "nodeId": node_id })))
        .await?;
    Ok(result["outerHTML"].as_str().unwrap_or_default().to_string())
}

/// # Errors
///
/// Returns `AppError::not_found` if no element matches `selector`, or a CDP
/// error if the outer HTML fetch fails.
pub async fn html(supervisor: &Supervisor, params: HtmlParams) -> Result<Value, AppError> {
    let sessions = supervisor.sessions().lock().await;
    let session = sessions
        .active_session()
        .ok_or_else(|| AppError::not_found("no active session"))?;

    let full_html = match params.selector.as_deref() {
        None => {
            let node_id = query_selector(session, "html").await?;
            outer_html(session, node_id).await?
        }
        Some(selector) => {
            let node_ids = query_selector_all(session, selector).await?;
            if node_ids.is_empty() {
                return Err(AppError::not_found(format!("no element matches {selector}")));
            }
            let mut elements = Vec::with_capacity(node_ids.len());
            for node_id in node_ids {
                let shape = describe_node(session, node_id).await?;
                let element_html = outer_html(session, node_id).await?;
                elements.push((shape, element_html));
            }
            join_element_segments(&elements)
        }
    };

    if let Some(find) = &params.find {
        let before = params.before.unwrap_or(DEFAULT_CONTEXT_LINES);
        let after = params.after.unwrap_or(DEFAULT_CONTEXT_LINES);
        let Some(snippet) = find_with_context(&full_html, find, before, after) else {
            return Err(AppError::not_found(format!("{find:?} not found in html")));
        };
        return Ok(json!({ "html": snippet, "matched": true }));
    }

    Ok(json!({ "html": full_html }))
}

const STYLESHEET_TEXT_EXPR: &str = "Array.from(document.styleSheets).map(s => { try { return Array.from(s.cssRules).map(r => r.cssText).join('\\n'); } catch (e) { return ''; } }).join('\\n\\n')";

/// # Errors
///
/// Returns `AppError::not_found` if no element matches `selector` for
/// `computed`/`inline`/`matched`, or an I/O error if `save` cannot write
/// `path`.
pub async fn css(supervisor: &Supervisor, params: CssParams) -> Result<Value, AppError> {
    let sessions = supervisor.sessions().lock().await;
    let session = sessions
        .active_session()
        .ok_or_else(|| AppError::not_found("no active session"))?;

    match params {
        CssParams::Computed { selector } => {
            let node_id = query_selector(session, &selector).await?;
            let result = session
                .send_command("CSS.getComputedStyleForNode", Some(json!({ "nodeId": node_id })))
                .await?;
            Ok(json!({ "computed": result["computedStyle"].clone() }))
        }
        CssParams::Inline { selector } => {
            let node_id = query_selector(session, &selector).await?;
            let result = session
                .send_command("CSS.getInlineStylesForNode", Some(json!({ "nodeId": node_id })))
                .await?;
            Ok(json!({ "inline": result["inlineStyle"].clone() }))
        }
        CssParams::Matched { selector } => {
            let node_ids = query_selector_all(session, &selector).await?;
            if node_ids.is_empty() {
                return Err(AppError::not_found(format!("no element matches {selector}")));
            }
            let mut seen = std::collections::HashMap::new();
            let mut elements = Vec::with_capacity(node_ids.len());
            for node_id in node_ids {
                let shape = describe_node(session, node_id).await?;
                let identifier = selector_identifier(&shape, &mut seen);
                let result = session
                    .send_command("CSS.getMatchedStylesForNode", Some(json!({ "nodeId": node_id })))
                    .await?;
                elements.push(json!({
                    "element": identifier,
                    "rules": result["matchedCSSRules"].clone(),
                }));
            }
            Ok(json!({ "elements": elements }))
        }
        CssParams::Get => {
            let sheets = session
                .send_command(
                    "Runtime.evaluate",
                    Some(json!({ "expression": STYLESHEET_TEXT_EXPR, "returnByValue": true })),
                )
                .await?;
            let text = sheets["result"]["value"].as_str().unwrap_or_default();
            Ok(json!({ "css": text }))
        }
        CssParams::Save { path } => {
            let sheets = session
                .send_command(
                    "Runtime.evaluate",
                    Some(json!({ "expression": STYLESHEET_TEXT_EXPR, "returnByValue": true })),
                )
                .await?;
            let text = sheets["result"]["value"].as_str().unwrap_or_default();
            std::fs::write(&path, text)?;
            Ok(json!({ "path": path, "bytes": text.len() }))
        }
    }
}

/// # Errors
///
/// Returns `AppError::internal` if no path is given and the capture cannot
/// be base64-decoded, or an I/O error writing the file.
pub async fn screenshot(supervisor: &Supervisor, params: ScreenshotParams) -> Result<Value, AppError> {
    let sessions = supervisor.sessions().lock().await;
    let session = sessions
        .active_session()
        .ok_or_else(|| AppError::not_found("no active session"))?;

    let mut capture_params = json!({ "format": "png" });
    if params.full_page {
        let metrics = session
            .send_command(
                "Runtime.evaluate",
                Some(json!({
                    "expression": "JSON.stringify({width: Math.max(document.documentElement.scrollWidth, document.documentElement.clientWidth), height: Math.max(document.documentElement.scrollHeight, document.documentElement.clientHeight)})",
                    "returnByValue": true,
                })),
            )
            .await?;
        if let Some(raw) = metrics["result"]["value"].as_str() {
            if let Ok(dims) = serde_json::from_str::<Value>(raw) {
                capture_params["clip"] = json!({
                    "x": 0.0,
                    "y": 0.0,
                    "width": dims["width"],
                    "height": dims["height"],
                    "scale": 1.0,
                });
                capture_params["captureBeyondViewport"] = json!(true);
            }
        }
    }

    let result = session
        .send_command("Page.captureScreenshot", Some(capture_params))
        .await?;
    let data = result["data"].as_str().unwrap_or_default();

    match &params.path {
        Some(path) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| AppError::internal(format!("failed to decode screenshot: {e}")))?;
            std::fs::write(path, &bytes)?;
            Ok(json!({ "path": path, "bytes": bytes.len() }))
        }
        None => Ok(json!({ "data": data, "encoding": "base64" })),
    }
}

/// # Errors
///
/// Returns `AppError::deadline` if evaluation exceeds `timeout`, or
/// `AppError::internal` wrapping the JS exception description.
pub async fn eval(supervisor: &Supervisor, params: EvalParams) -> Result<Value, AppError> {
    let sessions = supervisor.sessions().lock().await;
    let session = sessions
        .active_session()
        .ok_or_else(|| AppError::not_found("no active session"))?;

    let timeout = std::time::Duration::from_millis(params.timeout.unwrap_or(DEFAULT_EVAL_TIMEOUT_MS));
    let call = session.send_command(
        "Runtime.evaluate",
        Some(json!({
            "expression": params.expr,
            "returnByValue": true,
            "awaitPromise": true,
        })),
    );
    let result = tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| AppError::deadline("eval did not complete within timeout"))??;

    if let Some(details) = result.get("exceptionDetails") {
        let description = details["exception"]["description"]
            .as_str()
            .or_else(|| details["text"].as_str())
            .unwrap_or("unknown error");
        return Err(AppError::internal(format!("uncaught exception: {description}")));
    }

    Ok(json!({ "result": result["result"]["value"].clone() }))
}
