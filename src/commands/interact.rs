//! `click`, `type`, `key`, `select`, `focus`, `scroll` — the simplified
//! interaction surface exposed over IPC (CSS selectors only; no uid/hover/
//! drag/snapshot path — those stay out of this catalogue).

use serde_json::{Value, json};

use crate::error::AppError;
use crate::ipc::protocol::{ClickParams, FocusParams, KeyParams, ScrollParams, SelectParams, TypeParams};
use crate::session::ManagedSession;
use crate::supervisor::Supervisor;

async fn backend_node_id(session: &ManagedSession, selector: &str) -> Result<i64, AppError> {
    let doc = session.send_command("DOM.getDocument", None).await?;
    let root = doc["root"]["nodeId"]
        .as_i64()
        .ok_or_else(|| AppError::internal("DOM.getDocument missing root nodeId"))?;
    let query = session
        .send_command(
            "DOM.querySelector",
            Some(json!({ "nodeId": root, "selector": selector })),
        )
        .await?;
    let node_id = query["nodeId"]
        .as_i64()
        .filter(|&id| id > 0)
        .ok_or_else(|| AppError::not_found(format!("no element matches {selector}")))?;
    let describe = session
        .send_command("DOM.describeNode", Some(json!({ "nodeId": node_id })))
        .await?;
    describe["node"]["backendNodeId"]
        .as_i64()
        .ok_or_else(|| AppError::internal("DOM.describeNode missing backendNodeId"))
}

async fn element_center(session: &ManagedSession, backend_node_id: i64) -> Result<(f64, f64), AppError> {
    let result = session
        .send_command("DOM.getBoxModel", Some(json!({ "backendNodeId": backend_node_id })))
        .await?;
    let content = result["model"]["content"]
        .as_array()
        .ok_or_else(|| AppError::not_found("element has no box model (not rendered)"))?;
    if content.len() < 8 {
        return Err(AppError::not_found("element has no box model (not rendered)"));
    }
    let x1 = content[0].as_f64().unwrap_or(0.0);
    let y1 = content[1].as_f64().unwrap_or(0.0);
    let x3 = content[4].as_f64().unwrap_or(0.0);
    let y3 = content[5].as_f64().unwrap_or(0.0);
    if (x3 - x1).abs() < 1.0 || (y3 - y1).abs() < 1.0 {
        return Err(AppError::invalid_argument("element has zero size"));
    }
    Ok(((x1 + x3) / 2.0, (y1 + y3) / 2.0))
}

async fn resolve_coords(session: &ManagedSession, selector: &str) -> Result<(f64, f64), AppError> {
    let id = backend_node_id(session, selector).await?;
    session
        .send_command("DOM.scrollIntoViewIfNeeded", Some(json!({ "backendNodeId": id })))
        .await?;
    element_center(session, id).await
}

async fn active_session(supervisor: &Supervisor) -> Result<tokio::sync::MutexGuard<'_, crate::session::SessionManager>, AppError> {
    let sessions = supervisor.sessions().lock().await;
    if sessions.active_session().is_none() {
        return Err(AppError::not_found("no active session"));
    }
    Ok(sessions)
}

/// # Errors
///
/// Returns `AppError::not_found` if the selector matches nothing or the
/// element has zero size.
pub async fn click(supervisor: &Supervisor, params: ClickParams) -> Result<Value, AppError> {
    let sessions = active_session(supervisor).await?;
    let session = sessions.active_session().unwrap();
    let (x, y) = resolve_coords(session, &params.selector).await?;

    for (event_type, click_count) in [("mousePressed", 1), ("mouseReleased", 1)] {
        session
            .send_command(
                "Input.dispatchMouseEvent",
                Some(json!({ "type": event_type, "x": x, "y": y, "button": "left", "clickCount": click_count })),
            )
            .await?;
    }
    Ok(json!({ "clicked": true, "x": x, "y": y }))
}

/// Type `text` by focusing the element then dispatching `Input.insertText`,
/// which inserts the whole string without per-character key events.
///
/// # Errors
///
/// Returns `AppError::not_found` if the selector matches nothing.
pub async fn type_text(supervisor: &Supervisor, params: TypeParams) -> Result<Value, AppError> {
    let sessions = active_session(supervisor).await?;
    let session = sessions.active_session().unwrap();
    let id = backend_node_id(session, &params.selector).await?;
    session
        .send_command("DOM.focus", Some(json!({ "backendNodeId": id })))
        .await?;
    session
        .send_command("Input.insertText", Some(json!({ "text": params.text })))
        .await?;
    Ok(json!({ "typed": true }))
}

const MODIFIER_KEYS: &[&str] = &["Alt", "Control", "Meta", "Shift"];

fn is_valid_key(key: &str) -> bool {
    MODIFIER_KEYS.contains(&key)
        || key.len() == 1
        || matches!(
            key,
            "Enter" | "Tab" | "Escape" | "Backspace" | "Delete" | "Insert" | "Space"
                | "ArrowUp" | "ArrowDown" | "ArrowLeft" | "ArrowRight" | "Home" | "End"
                | "PageUp" | "PageDown"
        )
        || (key.starts_with('F') && key[1..].parse::<u8>().is_ok())
}

fn cdp_key_value(key: &str) -> &str {
    match key {
        "Enter" => "\r",
        "Tab" => "\t",
        "Space" => " ",
        other => other,
    }
}

fn cdp_key_code(key: &str) -> String {
    if key.len() == 1 {
        let c = key.chars().next().unwrap();
        if c.is_ascii_alphabetic() {
            return format!("Key{}", c.to_ascii_uppercase());
        }
        if c.is_ascii_digit() {
            return format!("Digit{c}");
        }
    }
    match key {
        "Alt" => "AltLeft".to_string(),
        "Control" => "ControlLeft".to_string(),
        "Meta" => "MetaLeft".to_string(),
        "Shift" => "ShiftLeft".to_string(),
        other => other.to_string(),
    }
}

fn modifier_bit(key: &str) -> u8 {
    match key {
        "Alt" => 1,
        "Control" => 2,
        "Meta" => 4,
        "Shift" => 8,
        _ => 0,
    }
}

/// Parse a `+`-joined key combination like `"Control+Enter"` and dispatch it
/// as a single keyDown/keyUp pair with the accumulated modifier bitmask.
///
/// # Errors
///
/// Returns `AppError::invalid_argument` for an unrecognized key name.
pub async fn key(supervisor: &Supervisor, params: KeyParams) -> Result<Value, AppError> {
    let parts: Vec<&str> = params.combo.split('+').collect();
    for part in &parts {
        if !is_valid_key(part) {
            return Err(AppError::invalid_argument(format!("unrecognized key: {part}")));
        }
    }
    let modifiers = parts.iter().fold(0u8, |acc, p| acc | modifier_bit(p));
    let primary = parts
        .iter()
        .rev()
        .find(|p| modifier_bit(p) == 0)
        .or_else(|| parts.last())
        .copied()
        .unwrap_or("");

    let sessions = active_session(supervisor).await?;
    let session = sessions.active_session().unwrap();
    let key_value = cdp_key_value(primary);
    let code = cdp_key_code(primary);

    session
        .send_command(
            "Input.dispatchKeyEvent",
            Some(json!({ "type": "keyDown", "key": key_value, "code": code, "modifiers": modifiers })),
        )
        .await?;
    session
        .send_command(
            "Input.dispatchKeyEvent",
            Some(json!({ "type": "keyUp", "key": key_value, "code": code, "modifiers": modifiers })),
        )
        .await?;
    Ok(json!({ "pressed": params.combo }))
}

/// Set a `<select>` element's value via in-page evaluation and fire a
/// `change` event so page listeners observe the update.
///
/// # Errors
///
/// Returns `AppError::not_found` if the selector matches nothing.
pub async fn select(supervisor: &Supervisor, params: SelectParams) -> Result<Value, AppError> {
    let sessions = active_session(supervisor).await?;
    let session = sessions.active_session().unwrap();
    let expr = format!(
        "(function(){{ const el = document.querySelector({selector:?}); if (!el) return false; el.value = {value:?}; el.dispatchEvent(new Event('change', {{bubbles: true}})); return true; }})()",
        selector = params.selector,
        value = params.value,
    );
    let result = session
        .send_command("Runtime.evaluate", Some(json!({ "expression": expr, "returnByValue": true })))
        .await?;
    if result["result"]["value"].as_bool() != Some(true) {
        return Err(AppError::not_found(format!("no element matches {}", params.selector)));
    }
    Ok(json!({ "selected": true }))
}

/// # Errors
///
/// Returns `AppError::not_found` if the selector matches nothing.
pub async fn focus(supervisor: &Supervisor, params: FocusParams) -> Result<Value, AppError> {
    let sessions = active_session(supervisor).await?;
    let session = sessions.active_session().unwrap();
    let id = backend_node_id(session, &params.selector).await?;
    session
        .send_command("DOM.focus", Some(json!({ "backendNodeId": id })))
        .await?;
    Ok(json!({ "focused": true }))
}

/// Scroll an element (if `selector` given) or the window by (`dx`, `dy`).
///
/// # Errors
///
/// Returns `AppError::not_found` if `selector` is given but matches nothing.
pub async fn scroll(supervisor: &Supervisor, params: ScrollParams) -> Result<Value, AppError> {
    let sessions = active_session(supervisor).await?;
    let session = sessions.active_session().unwrap();
    let dx = params.dx.unwrap_or(0.0);
    let dy = params.dy.unwrap_or(0.0);

    let expr = if let Some(selector) = &params.selector {
        format!(
            "(function(){{ const el = document.querySelector({selector:?}); if (!el) return false; el.scrollBy({dx}, {dy}); return true; }})()"
        )
    } else {
        format!("window.scrollBy({dx}, {dy}); true")
    };

    let result = session
        .send_command("Runtime.evaluate", Some(json!({ "expression": expr, "returnByValue": true })))
        .await?;
    if params.selector.is_some() && result["result"]["value"].as_bool() != Some(true) {
        return Err(AppError::not_found(format!(
            "no element matches {}",
            params.selector.unwrap_or_default()
        )));
    }
    Ok(json!({ "scrolled": true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdp_key_code_maps_letters_and_digits() {
        assert_eq!(cdp_key_code("a"), "KeyA");
        assert_eq!(cdp_key_code("5"), "Digit5");
        assert_eq!(cdp_key_code("Enter"), "Enter");
    }

    #[test]
    fn modifier_bit_assigns_distinct_bits() {
        assert_eq!(modifier_bit("Alt"), 1);
        assert_eq!(modifier_bit("Control"), 2);
        assert_eq!(modifier_bit("Meta"), 4);
        assert_eq!(modifier_bit("Shift"), 8);
        assert_eq!(modifier_bit("Enter"), 0);
    }

    #[test]
    fn is_valid_key_accepts_known_names_and_single_chars() {
        assert!(is_valid_key("Enter"));
        assert!(is_valid_key("a"));
        assert!(is_valid_key("F5"));
        assert!(!is_valid_key("NotAKey"));
    }
}
