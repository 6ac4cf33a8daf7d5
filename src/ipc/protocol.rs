//! The IPC wire format: the outer envelope plus the typed `Command`
//! tagged-union decoded from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// Outer envelope read off the socket: `{cmd, target?, params?, debug?}`.
#[derive(Debug, Deserialize)]
pub struct IpcRequest {
    pub cmd: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub debug: bool,
}

/// Outer envelope written back: `{ok, data?, error?}`.
#[derive(Debug, Serialize)]
pub struct IpcResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set for the `not-found`/"empty, not an error" notice case so a CLI
    /// front-end can render it without the `Error: ` prefix.
    #[serde(skip_serializing_if = "is_false", rename = "notice")]
    pub is_notice: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl IpcResponse {
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            is_notice: false,
        }
    }

    #[must_use]
    pub fn err(e: &AppError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(e.message.clone()),
            is_notice: e.is_notice(),
        }
    }
}

/// One variant per command-catalogue row. `params` is decoded into the
/// matching variant's struct once `cmd` has selected it.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Status,
    Navigate(NavigateParams),
    Reload(ReloadParams),
    Back(WaitParams),
    Forward(WaitParams),
    Ready(ReadyParams),
    Console(ConsoleParams),
    Network(NetworkParams),
    Cookies(CookiesParams),
    Html(HtmlParams),
    Css(CssParams),
    Screenshot(ScreenshotParams),
    Eval(EvalParams),
    Click(ClickParams),
    Type(TypeParams),
    Key(KeyParams),
    Select(SelectParams),
    Focus(FocusParams),
    Scroll(ScrollParams),
    Clear(ClearParams),
    Reconnect,
    Stop,
}

impl Command {
    /// Decode a raw `cmd` + `params` pair into a `Command` by re-serializing
    /// them as a single tagged object, matching the externally-tagged enum's
    /// wire shape (`serde(tag = "cmd")`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::invalid_argument` for an unknown `cmd` or
    /// malformed `params`.
    pub fn decode(cmd: &str, params: Value) -> Result<Self, AppError> {
        let mut object = match params {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(AppError::invalid_argument(format!(
                    "params must be an object, got {other}"
                )));
            }
        };
        object.insert("cmd".to_string(), Value::String(cmd.to_string()));
        serde_json::from_value(Value::Object(object))
            .map_err(|e| AppError::invalid_argument(format!("{cmd}: {e}")))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NavigateParams {
    pub url: String,
    #[serde(default)]
    pub wait: bool,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReloadParams {
    #[serde(default)]
    pub wait: bool,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WaitParams {
    #[serde(default)]
    pub wait: bool,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadyParams {
    pub selector: Option<String>,
    pub expr: Option<String>,
    #[serde(default)]
    pub network_idle: bool,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsoleParams {
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    pub find: Option<String>,
    pub head: Option<usize>,
    pub tail: Option<usize>,
    pub range: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkParams {
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub find: Option<String>,
    pub status: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub mime: Option<String>,
    pub min_duration: Option<f64>,
    pub min_size: Option<u64>,
    #[serde(default)]
    pub failed: bool,
    pub head: Option<usize>,
    pub tail: Option<usize>,
    pub range: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CookiesParams {
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HtmlParams {
    pub selector: Option<String>,
    pub find: Option<String>,
    pub before: Option<usize>,
    pub after: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CssParams {
    /// Computed style of the first element matching `selector`.
    Computed { selector: String },
    /// Raw text of every stylesheet attached to the page.
    Get,
    /// The inline `style` attribute of the first element matching `selector`.
    Inline { selector: String },
    /// Matched CSS rules for every element matching `selector`, each keyed
    /// by its selector-derived identifier.
    Matched { selector: String },
    /// Every stylesheet's raw text, concatenated and written to `path`.
    Save { path: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScreenshotParams {
    pub path: Option<String>,
    #[serde(default)]
    pub full_page: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvalParams {
    pub expr: String,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClickParams {
    pub selector: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypeParams {
    pub selector: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyParams {
    pub combo: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectParams {
    pub selector: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FocusParams {
    pub selector: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrollParams {
    pub selector: Option<String>,
    pub dx: Option<f64>,
    pub dy: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearParams {
    pub buffer: Option<String>,
}
