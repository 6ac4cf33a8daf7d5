#![allow(clippy::doc_markdown)]

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "webctl",
    version,
    about = "A thin client for the webctl browser-control daemon",
    long_about = "webctl is a command-line client for the webctl daemon, a background process \
        that holds a persistent Chrome DevTools Protocol connection and serves browser-control \
        commands over a local Unix socket. This binary does no CDP work itself: it serializes \
        one `{cmd, ...}` request, sends it to the daemon's socket, and prints the decoded \
        response.\n\n\
        Use `webctl daemon start` to launch the daemon in the foreground, then run any other \
        subcommand from another shell (or script) to drive it.",
    term_width = 100
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args)]
pub struct GlobalOpts {
    /// Path to the daemon's IPC socket (defaults to the per-user runtime directory)
    #[arg(long, global = true)]
    pub socket: Option<String>,

    /// Path to a config file (overrides the default search order)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Restrict a command to a specific page session id
    #[arg(long, global = true)]
    pub target: Option<String>,

    /// Ask the daemon to log diagnostics for this request to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(flatten)]
    pub output: OutputFormat,
}

#[derive(Args)]
#[group(multiple = false)]
pub struct OutputFormat {
    /// Pretty-print the response JSON
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Print only `data` (or the notice/error message) without the `{ok, ...}` envelope
    #[arg(long, global = true)]
    pub plain: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon in the foreground, or stop a running one
    Daemon(DaemonArgs),

    /// Connection state and attached page sessions
    Status,

    /// Navigate the active session to a URL
    Navigate(NavigateArgs),

    /// Reload the active session, bypassing the cache
    Reload(WaitArgs),

    /// Go back one entry in session history
    Back(WaitArgs),

    /// Go forward one entry in session history
    Forward(WaitArgs),

    /// Block until a load/selector/network-idle/eval condition is met
    Ready(ReadyArgs),

    /// Read buffered console entries
    Console(ConsoleArgs),

    /// Read buffered network entries
    Network(NetworkArgs),

    /// Read cookies visible to the active session
    Cookies(CookiesArgs),

    /// Fetch (optionally a slice of) the active session's HTML
    Html(HtmlArgs),

    /// Inspect or export CSS for the active session
    Css(CssArgs),

    /// Capture a screenshot of the active session
    Screenshot(ScreenshotArgs),

    /// Evaluate a JavaScript expression in the active session
    Eval(EvalArgs),

    /// Click an element
    Click(SelectorArgs),

    /// Type text into an element
    Type(TypeArgs),

    /// Dispatch a key combination
    Key(KeyArgs),

    /// Choose an option in a `<select>` element
    Select(SelectOptionArgs),

    /// Focus an element
    Focus(SelectorArgs),

    /// Scroll the page or an element into view
    Scroll(ScrollArgs),

    /// Truncate the console and/or network buffers
    Clear(ClearArgs),

    /// Force the daemon to tear down and re-establish its CDP connection
    Reconnect,
}

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub action: DaemonAction,
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Resolve configuration, connect to Chrome, and serve the IPC socket
    /// until stopped. Runs in the foreground; the caller backgrounds it.
    Start,
    /// Send a `stop` request over the existing socket and wait for the
    /// daemon to exit.
    Stop,
}

#[derive(Args)]
pub struct NavigateArgs {
    pub url: String,
    /// Wait for the load event before returning
    #[arg(long)]
    pub wait: bool,
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct WaitArgs {
    #[arg(long)]
    pub wait: bool,
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct ReadyArgs {
    /// Wait for this selector to appear
    #[arg(long)]
    pub selector: Option<String>,
    /// Wait until this JS expression evaluates truthy
    #[arg(long)]
    pub expr: Option<String>,
    /// Wait for 500ms of no in-flight network requests
    #[arg(long)]
    pub network_idle: bool,
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct ConsoleArgs {
    /// Comma-separated entry types (log, debug, info, error, warning)
    #[arg(long = "type")]
    pub entry_type: Option<String>,
    #[arg(long)]
    pub find: Option<String>,
    #[arg(long)]
    pub head: Option<usize>,
    #[arg(long)]
    pub tail: Option<usize>,
}

#[derive(Args)]
pub struct NetworkArgs {
    /// Comma-separated resource types (Document, Script, XHR, ...)
    #[arg(long = "type")]
    pub resource_type: Option<String>,
    #[arg(long)]
    pub find: Option<String>,
    /// Comma-separated status filters (e.g. "200,4xx,5xx")
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub method: Option<String>,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub mime: Option<String>,
    #[arg(long)]
    pub min_duration: Option<f64>,
    #[arg(long)]
    pub min_size: Option<u64>,
    #[arg(long)]
    pub failed: bool,
    #[arg(long)]
    pub head: Option<usize>,
    #[arg(long)]
    pub tail: Option<usize>,
}

#[derive(Args)]
pub struct CookiesArgs {
    #[arg(long)]
    pub domain: Option<String>,
}

#[derive(Args)]
pub struct HtmlArgs {
    #[arg(long)]
    pub selector: Option<String>,
    #[arg(long)]
    pub find: Option<String>,
    /// Lines of context before a match (grep-style `-B`)
    #[arg(short = 'B', long)]
    pub before: Option<usize>,
    /// Lines of context after a match (grep-style `-A`)
    #[arg(short = 'A', long)]
    pub after: Option<usize>,
    /// Lines of context on both sides (grep-style `-C`, overrides before/after)
    #[arg(short = 'C', long)]
    pub context: Option<usize>,
}

#[derive(Args)]
pub struct CssArgs {
    #[command(subcommand)]
    pub mode: CssMode,
}

#[derive(Subcommand)]
pub enum CssMode {
    /// Computed style of the first matching element
    Computed { selector: String },
    /// Raw text of every stylesheet attached to the page
    Get,
    /// The inline `style` attribute of the first matching element
    Inline { selector: String },
    /// Matched CSS rules for every matching element
    Matched { selector: String },
    /// Write every stylesheet's raw text to a file
    Save { path: String },
}

#[derive(Args)]
pub struct ScreenshotArgs {
    /// Write the PNG to this path instead of returning it inline as base64
    pub path: Option<String>,
    #[arg(long)]
    pub full_page: bool,
}

#[derive(Args)]
pub struct EvalArgs {
    pub expr: String,
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct SelectorArgs {
    pub selector: String,
}

#[derive(Args)]
pub struct TypeArgs {
    pub selector: String,
    pub text: String,
}

#[derive(Args)]
pub struct KeyArgs {
    /// Key combination, e.g. "Enter" or "Control+A"
    pub combo: String,
}

#[derive(Args)]
pub struct SelectOptionArgs {
    pub selector: String,
    pub value: String,
}

#[derive(Args)]
pub struct ScrollArgs {
    #[arg(long)]
    pub selector: Option<String>,
    #[arg(long)]
    pub dx: Option<f64>,
    #[arg(long)]
    pub dy: Option<f64>,
}

#[derive(Args)]
pub struct ClearArgs {
    /// Which buffer to truncate: "console", "network", or omit for both
    pub buffer: Option<String>,
}
