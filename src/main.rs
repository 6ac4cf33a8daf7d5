mod cli;

use std::path::PathBuf;

use clap::{Parser, error::ErrorKind};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use agentchrome::config;
use agentchrome::daemon;
use agentchrome::error::{AppError, ExitCode};
use agentchrome::ipc::protocol::IpcResponse;
use agentchrome::runtime_dir;

use cli::{
    Cli, ClearArgs, Command, ConsoleArgs, CookiesArgs, CssArgs, CssMode, DaemonAction,
    EvalArgs, GlobalOpts, HtmlArgs, KeyArgs, NavigateArgs, NetworkArgs, ReadyArgs,
    ScreenshotArgs, ScrollArgs, SelectOptionArgs, SelectorArgs, TypeArgs, WaitArgs,
};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.print().expect("failed to write to stdout");
                std::process::exit(0);
            }
            let msg = e.kind().to_string();
            let full = e.to_string();
            let clean = full
                .lines()
                .filter(|line| {
                    let trimmed = line.trim();
                    !trimmed.is_empty()
                        && !trimmed.starts_with("For more information")
                        && !trimmed.starts_with("Usage:")
                })
                .map(|line| line.strip_prefix("error: ").unwrap_or(line).trim())
                .collect::<Vec<_>>()
                .join(", ");
            let clean = if clean.is_empty() { msg } else { clean };
            let app_err = AppError {
                message: clean,
                code: ExitCode::GeneralError,
                custom_json: None,
            };
            app_err.print_json_stderr();
            std::process::exit(app_err.code as i32);
        }
    };

    if let Err(e) = run(cli).await {
        e.print_json_stderr();
        #[allow(clippy::cast_possible_truncation)]
        std::process::exit(e.code as i32);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    if let Command::Daemon(args) = &cli.command {
        return match args.action {
            DaemonAction::Start => run_daemon(&cli.global).await,
            DaemonAction::Stop => {
                let response = send_request(&cli.global, "stop", Value::Null).await?;
                print_response(&cli.global, &response);
                Ok(())
            }
        };
    }

    let (cmd, params) = encode(&cli.command);
    let response = send_request(&cli.global, cmd, params).await?;
    print_response(&cli.global, &response);
    if !response.ok {
        // The daemon already collapsed this to a message + notice flag; the
        // exit code distinctions (timeout vs. protocol vs. connection) only
        // matter while the error still carries its originating `ErrorKind`.
        std::process::exit(ExitCode::GeneralError as i32);
    }
    Ok(())
}

async fn run_daemon(global: &GlobalOpts) -> Result<(), AppError> {
    let (config_path, config_file) = config::load_config(global.config.as_deref());
    let resolved = config::resolve_config(&config_file, config_path);
    daemon::run(resolved).await
}

/// Translate one CLI subcommand into its `(cmd, params)` IPC pair. `Daemon`
/// is handled separately in `run` since it never goes over the socket.
fn encode(command: &Command) -> (&'static str, Value) {
    match command {
        Command::Daemon(_) => unreachable!("handled in run"),
        Command::Status => ("status", Value::Null),
        Command::Navigate(a) => ("navigate", encode_navigate(a)),
        Command::Reload(a) => ("reload", encode_wait(a)),
        Command::Back(a) => ("back", encode_wait(a)),
        Command::Forward(a) => ("forward", encode_wait(a)),
        Command::Ready(a) => ("ready", encode_ready(a)),
        Command::Console(a) => ("console", encode_console(a)),
        Command::Network(a) => ("network", encode_network(a)),
        Command::Cookies(a) => ("cookies", encode_cookies(a)),
        Command::Html(a) => ("html", encode_html(a)),
        Command::Css(a) => ("css", encode_css(a)),
        Command::Screenshot(a) => ("screenshot", encode_screenshot(a)),
        Command::Eval(a) => ("eval", encode_eval(a)),
        Command::Click(a) => ("click", encode_selector(a)),
        Command::Type(a) => ("type", encode_type(a)),
        Command::Key(a) => ("key", encode_key(a)),
        Command::Select(a) => ("select", encode_select(a)),
        Command::Focus(a) => ("focus", encode_selector(a)),
        Command::Scroll(a) => ("scroll", encode_scroll(a)),
        Command::Clear(a) => ("clear", encode_clear(a)),
        Command::Reconnect => ("reconnect", Value::Null),
    }
}

fn encode_navigate(a: &NavigateArgs) -> Value {
    json!({ "url": a.url, "wait": a.wait, "timeout": a.timeout })
}

fn encode_wait(a: &WaitArgs) -> Value {
    json!({ "wait": a.wait, "timeout": a.timeout })
}

fn encode_ready(a: &ReadyArgs) -> Value {
    json!({
        "selector": a.selector,
        "expr": a.expr,
        "network_idle": a.network_idle,
        "timeout": a.timeout,
    })
}

fn encode_console(a: &ConsoleArgs) -> Value {
    json!({
        "type": a.entry_type,
        "find": a.find,
        "head": a.head,
        "tail": a.tail,
    })
}

fn encode_network(a: &NetworkArgs) -> Value {
    json!({
        "type": a.resource_type,
        "find": a.find,
        "status": a.status,
        "method": a.method,
        "url": a.url,
        "mime": a.mime,
        "min_duration": a.min_duration,
        "min_size": a.min_size,
        "failed": a.failed,
        "head": a.head,
        "tail": a.tail,
    })
}

fn encode_cookies(a: &CookiesArgs) -> Value {
    json!({ "domain": a.domain })
}

fn encode_html(a: &HtmlArgs) -> Value {
    let (before, after) = match a.context {
        Some(c) => (Some(c), Some(c)),
        None => (a.before, a.after),
    };
    json!({ "selector": a.selector, "find": a.find, "before": before, "after": after })
}

fn encode_css(a: &CssArgs) -> Value {
    match &a.mode {
        CssMode::Computed { selector } => json!({ "mode": "computed", "selector": selector }),
        CssMode::Get => json!({ "mode": "get" }),
        CssMode::Inline { selector } => json!({ "mode": "inline", "selector": selector }),
        CssMode::Matched { selector } => json!({ "mode": "matched", "selector": selector }),
        CssMode::Save { path } => json!({ "mode": "save", "path": path }),
    }
}

fn encode_screenshot(a: &ScreenshotArgs) -> Value {
    json!({ "path": a.path, "full_page": a.full_page })
}

fn encode_eval(a: &EvalArgs) -> Value {
    json!({ "expr": a.expr, "timeout": a.timeout })
}

fn encode_selector(a: &SelectorArgs) -> Value {
    json!({ "selector": a.selector })
}

fn encode_type(a: &TypeArgs) -> Value {
    json!({ "selector": a.selector, "text": a.text })
}

fn encode_key(a: &KeyArgs) -> Value {
    json!({ "combo": a.combo })
}

fn encode_select(a: &SelectOptionArgs) -> Value {
    json!({ "selector": a.selector, "value": a.value })
}

fn encode_scroll(a: &ScrollArgs) -> Value {
    json!({ "selector": a.selector, "dx": a.dx, "dy": a.dy })
}

fn encode_clear(a: &ClearArgs) -> Value {
    json!({ "buffer": a.buffer })
}

/// Send one `{cmd, target?, params, debug?}` request over the daemon's IPC
/// socket and decode the single-line `IpcResponse` written back.
///
/// # Errors
///
/// Returns `AppError::not_running` if the socket cannot be reached, or
/// `AppError::invalid_argument` if the daemon's reply is not valid JSON.
async fn send_request(global: &GlobalOpts, cmd: &str, params: Value) -> Result<IpcResponse, AppError> {
    let socket = match &global.socket {
        Some(path) => PathBuf::from(path),
        None => runtime_dir::socket_path()?,
    };

    let mut stream = UnixStream::connect(&socket).await.map_err(|_| AppError::not_running())?;

    let request = json!({
        "cmd": cmd,
        "target": global.target,
        "params": params,
        "debug": global.debug,
    });
    let mut body = serde_json::to_string(&request)?;
    body.push('\n');
    stream.write_all(body.as_bytes()).await?;
    stream.shutdown().await.ok();

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.is_empty() {
        return Err(AppError::not_running());
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

fn print_response(global: &GlobalOpts, response: &IpcResponse) {
    let rendered = if global.output.plain {
        if response.ok {
            response.data.clone().unwrap_or(Value::Null)
        } else {
            Value::String(response.error.clone().unwrap_or_default())
        }
    } else {
        serde_json::to_value(response).unwrap_or(Value::Null)
    };

    if let Value::String(s) = &rendered {
        println!("{s}");
        return;
    }

    let text = if global.output.pretty {
        serde_json::to_string_pretty(&rendered)
    } else {
        serde_json::to_string(&rendered)
    };
    println!("{}", text.unwrap_or_else(|_| rendered.to_string()));
}
