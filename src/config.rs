use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default config file template with comments, used by `config init`.
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# webctl daemon configuration file

# Connection defaults
# [connection]
# host = "127.0.0.1"
# port = 9222
# timeout_ms = 30000

# Daemon tuning
# [daemon]
# buffer_capacity = 10000
# body_inline_max_bytes = 10000
# heartbeat_interval_ms = 5000
# reconnect_initial_backoff_ms = 1000
# reconnect_max_backoff_ms = 30000
# reconnect_max_attempts = 5
# runtime_dir = "/custom/path"

# Output defaults
# [output]
# format = "json"           # json, pretty, plain
"#;

// ---------------------------------------------------------------------------
// Config structs (parsed from TOML)
// ---------------------------------------------------------------------------

/// Represents the parsed TOML config file. All fields optional.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigFile {
    pub connection: ConnectionConfig,
    pub daemon: DaemonConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub buffer_capacity: Option<usize>,
    pub body_inline_max_bytes: Option<usize>,
    pub heartbeat_interval_ms: Option<u64>,
    pub reconnect_initial_backoff_ms: Option<u64>,
    pub reconnect_max_backoff_ms: Option<u64>,
    pub reconnect_max_attempts: Option<u32>,
    pub runtime_dir: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved config (all defaults filled in)
// ---------------------------------------------------------------------------

/// Fully resolved configuration with all defaults filled in.
#[derive(Debug, Serialize)]
pub struct ResolvedConfig {
    pub config_path: Option<PathBuf>,
    pub connection: ResolvedConnection,
    pub daemon: ResolvedDaemon,
    pub output: ResolvedOutput,
}

#[derive(Debug, Serialize)]
pub struct ResolvedConnection {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ResolvedDaemon {
    pub buffer_capacity: usize,
    pub body_inline_max_bytes: usize,
    pub heartbeat_interval_ms: u64,
    pub reconnect_initial_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,
    pub reconnect_max_attempts: u32,
    pub runtime_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ResolvedOutput {
    pub format: String,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing config file.
    Io(std::io::Error),
    /// Config file already exists (for `config init`).
    AlreadyExists(PathBuf),
    /// Could not determine config directory.
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config file error: {e}"),
            Self::AlreadyExists(p) => {
                write!(f, "Config file already exists: {}", p.display())
            }
            Self::NoConfigDir => write!(f, "could not determine config directory"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ConfigError> for crate::error::AppError {
    fn from(e: ConfigError) -> Self {
        Self::internal(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Config file search
// ---------------------------------------------------------------------------

/// Find the first config file that exists, checking locations in priority order.
///
/// Search order:
/// 1. `explicit_path` (from `--config` flag)
/// 2. `$WEBCTL_CONFIG` environment variable
/// 3. `./.webctl.toml` (project-local)
/// 4. `<config_dir>/webctl/config.toml` (XDG / platform config dir)
/// 5. `~/.webctl.toml` (home directory fallback)
#[must_use]
pub fn find_config_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
    find_config_file_with(explicit_path, std::env::var("WEBCTL_CONFIG").ok())
}

/// Testable variant of [`find_config_file`] that accepts an explicit env value.
#[must_use]
pub fn find_config_file_with(
    explicit_path: Option<&Path>,
    env_config: Option<String>,
) -> Option<PathBuf> {
    if let Some(p) = explicit_path {
        if p.exists() {
            return Some(p.to_path_buf());
        }
    }

    if let Some(env_path) = env_config {
        let p = PathBuf::from(env_path);
        if p.exists() {
            return Some(p);
        }
    }

    let local = PathBuf::from(".webctl.toml");
    if local.exists() {
        return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("webctl").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".webctl.toml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load and parse a config file. Returns the file path (if found) and the parsed config.
///
/// On parse errors, prints a warning to stderr and returns `ConfigFile::default()`.
#[must_use]
pub fn load_config(explicit_path: Option<&Path>) -> (Option<PathBuf>, ConfigFile) {
    let path = find_config_file(explicit_path);
    match &path {
        Some(p) => {
            let config = load_config_from(p);
            (path, config)
        }
        None => (None, ConfigFile::default()),
    }
}

/// Load and parse a config file from a specific path.
///
/// On parse errors, prints a warning to stderr and returns `ConfigFile::default()`.
#[must_use]
pub fn load_config_from(path: &Path) -> ConfigFile {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "warning: could not read config file {}: {e}",
                path.display()
            );
            return ConfigFile::default();
        }
    };

    parse_config(&contents, path)
}

/// Parse TOML content into a `ConfigFile`.
///
/// Uses a two-pass strategy: first tries strict parsing (to detect unknown keys),
/// then falls back to lenient parsing if strict fails due to unknown fields.
#[must_use]
pub fn parse_config(contents: &str, path: &Path) -> ConfigFile {
    match toml::from_str::<StrictConfigFile>(contents) {
        Ok(strict) => strict.into(),
        Err(strict_err) => match toml::from_str::<ConfigFile>(contents) {
            Ok(config) => {
                eprintln!(
                    "warning: unknown keys in config file {}: {strict_err}",
                    path.display()
                );
                config
            }
            Err(parse_err) => {
                eprintln!(
                    "warning: could not parse config file {}: {parse_err}",
                    path.display()
                );
                ConfigFile::default()
            }
        },
    }
}

/// Strict variant used for the first-pass parse to detect unknown keys.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictConfigFile {
    #[serde(default)]
    connection: StrictConnectionConfig,
    #[serde(default)]
    daemon: StrictDaemonConfig,
    #[serde(default)]
    output: StrictOutputConfig,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictConnectionConfig {
    host: Option<String>,
    port: Option<u16>,
    timeout_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictDaemonConfig {
    buffer_capacity: Option<usize>,
    body_inline_max_bytes: Option<usize>,
    heartbeat_interval_ms: Option<u64>,
    reconnect_initial_backoff_ms: Option<u64>,
    reconnect_max_backoff_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
    runtime_dir: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictOutputConfig {
    format: Option<String>,
}

impl From<StrictConfigFile> for ConfigFile {
    fn from(s: StrictConfigFile) -> Self {
        Self {
            connection: ConnectionConfig {
                host: s.connection.host,
                port: s.connection.port,
                timeout_ms: s.connection.timeout_ms,
            },
            daemon: DaemonConfig {
                buffer_capacity: s.daemon.buffer_capacity,
                body_inline_max_bytes: s.daemon.body_inline_max_bytes,
                heartbeat_interval_ms: s.daemon.heartbeat_interval_ms,
                reconnect_initial_backoff_ms: s.daemon.reconnect_initial_backoff_ms,
                reconnect_max_backoff_ms: s.daemon.reconnect_max_backoff_ms,
                reconnect_max_attempts: s.daemon.reconnect_max_attempts,
                runtime_dir: s.daemon.runtime_dir,
            },
            output: OutputConfig {
                format: s.output.format,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Config resolution
// ---------------------------------------------------------------------------

/// Default port for CDP connections.
const DEFAULT_PORT: u16 = 9222;
/// Default timeout for commands in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default Event Buffer capacity (entries), per component design.
const DEFAULT_BUFFER_CAPACITY: usize = 10_000;
/// Default inline body threshold in bytes, grounded in the reference
/// network module's `MAX_INLINE_BODY_SIZE`.
const DEFAULT_BODY_INLINE_MAX_BYTES: usize = 10_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
const DEFAULT_RECONNECT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Resolve a config file into a fully-populated `ResolvedConfig` with all defaults.
#[must_use]
pub fn resolve_config(file: &ConfigFile, config_path: Option<PathBuf>) -> ResolvedConfig {
    let port = file.connection.port.unwrap_or(DEFAULT_PORT);
    let port = if port == 0 { DEFAULT_PORT } else { port };

    ResolvedConfig {
        config_path,
        connection: ResolvedConnection {
            host: file
                .connection
                .host
                .clone()
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            timeout_ms: file.connection.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        },
        daemon: ResolvedDaemon {
            buffer_capacity: file.daemon.buffer_capacity.unwrap_or(DEFAULT_BUFFER_CAPACITY),
            body_inline_max_bytes: file
                .daemon
                .body_inline_max_bytes
                .unwrap_or(DEFAULT_BODY_INLINE_MAX_BYTES),
            heartbeat_interval_ms: file
                .daemon
                .heartbeat_interval_ms
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS),
            reconnect_initial_backoff_ms: file
                .daemon
                .reconnect_initial_backoff_ms
                .unwrap_or(DEFAULT_RECONNECT_INITIAL_BACKOFF_MS),
            reconnect_max_backoff_ms: file
                .daemon
                .reconnect_max_backoff_ms
                .unwrap_or(DEFAULT_RECONNECT_MAX_BACKOFF_MS),
            reconnect_max_attempts: file
                .daemon
                .reconnect_max_attempts
                .unwrap_or(DEFAULT_RECONNECT_MAX_ATTEMPTS),
            runtime_dir: file.daemon.runtime_dir.clone().map(PathBuf::from),
        },
        output: ResolvedOutput {
            format: file
                .output
                .format
                .clone()
                .unwrap_or_else(|| "json".to_string()),
        },
    }
}

// ---------------------------------------------------------------------------
// Config init
// ---------------------------------------------------------------------------

/// Default path for `config init`: `<config_dir>/webctl/config.toml`.
///
/// # Errors
///
/// Returns `ConfigError::NoConfigDir` if the platform config directory cannot be determined.
pub fn default_init_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|d| d.join("webctl").join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Create a default config file at the given path (or the default XDG path).
///
/// # Errors
///
/// - `ConfigError::AlreadyExists` if the file already exists
/// - `ConfigError::Io` on I/O failure
/// - `ConfigError::NoConfigDir` if no target path and platform config dir unknown
pub fn init_config(target_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match target_path {
        Some(p) => p.to_path_buf(),
        None => default_init_path()?,
    };

    init_config_to(&path)
}

/// Testable variant of [`init_config`] that writes to an explicit path.
///
/// # Errors
///
/// - `ConfigError::AlreadyExists` if the file already exists
/// - `ConfigError::Io` on I/O failure
pub fn init_config_to(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_full_config() {
        let toml = r#"
[connection]
host = "10.0.0.1"
port = 9333
timeout_ms = 60000

[daemon]
buffer_capacity = 5000
body_inline_max_bytes = 2000
heartbeat_interval_ms = 1000
reconnect_initial_backoff_ms = 500
reconnect_max_backoff_ms = 10000
reconnect_max_attempts = 3
runtime_dir = "/tmp/webctl-run"

[output]
format = "pretty"
"#;
        let config = parse_config(toml, Path::new("test.toml"));
        assert_eq!(config.connection.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(config.connection.port, Some(9333));
        assert_eq!(config.connection.timeout_ms, Some(60000));
        assert_eq!(config.daemon.buffer_capacity, Some(5000));
        assert_eq!(config.daemon.body_inline_max_bytes, Some(2000));
        assert_eq!(config.daemon.heartbeat_interval_ms, Some(1000));
        assert_eq!(config.daemon.reconnect_initial_backoff_ms, Some(500));
        assert_eq!(config.daemon.reconnect_max_backoff_ms, Some(10000));
        assert_eq!(config.daemon.reconnect_max_attempts, Some(3));
        assert_eq!(config.daemon.runtime_dir.as_deref(), Some("/tmp/webctl-run"));
        assert_eq!(config.output.format.as_deref(), Some("pretty"));
    }

    #[test]
    fn parse_empty_config() {
        let config = parse_config("", Path::new("test.toml"));
        assert!(config.connection.host.is_none());
        assert!(config.connection.port.is_none());
        assert!(config.daemon.buffer_capacity.is_none());
        assert!(config.output.format.is_none());
    }

    #[test]
    fn parse_partial_config() {
        let toml = "[connection]\nport = 9333\n";
        let config = parse_config(toml, Path::new("test.toml"));
        assert_eq!(config.connection.port, Some(9333));
        assert!(config.connection.host.is_none());
        assert!(config.daemon.buffer_capacity.is_none());
    }

    #[test]
    fn parse_invalid_toml_returns_default() {
        let config = parse_config("this is not valid toml [[[", Path::new("test.toml"));
        assert!(config.connection.host.is_none());
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn parse_unknown_keys_warns_but_keeps_known() {
        let toml = r#"
[connection]
port = 9333
unknown_key = "hello"
"#;
        let config = parse_config(toml, Path::new("test.toml"));
        assert_eq!(config.connection.port, Some(9333));
    }

    #[test]
    fn resolve_defaults() {
        let config = ConfigFile::default();
        let resolved = resolve_config(&config, None);
        assert_eq!(resolved.connection.host, "127.0.0.1");
        assert_eq!(resolved.connection.port, DEFAULT_PORT);
        assert_eq!(resolved.connection.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(resolved.daemon.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(
            resolved.daemon.body_inline_max_bytes,
            DEFAULT_BODY_INLINE_MAX_BYTES
        );
        assert_eq!(
            resolved.daemon.heartbeat_interval_ms,
            DEFAULT_HEARTBEAT_INTERVAL_MS
        );
        assert_eq!(resolved.daemon.reconnect_max_attempts, DEFAULT_RECONNECT_MAX_ATTEMPTS);
        assert!(resolved.daemon.runtime_dir.is_none());
        assert_eq!(resolved.output.format, "json");
        assert!(resolved.config_path.is_none());
    }

    #[test]
    fn resolve_overrides() {
        let config = ConfigFile {
            connection: ConnectionConfig {
                host: Some("10.0.0.1".into()),
                port: Some(9444),
                timeout_ms: Some(5000),
            },
            daemon: DaemonConfig {
                buffer_capacity: Some(500),
                body_inline_max_bytes: Some(1000),
                heartbeat_interval_ms: Some(2000),
                reconnect_initial_backoff_ms: Some(200),
                reconnect_max_backoff_ms: Some(8000),
                reconnect_max_attempts: Some(2),
                runtime_dir: Some("/tmp/custom".into()),
            },
            output: OutputConfig {
                format: Some("pretty".into()),
            },
        };
        let path = PathBuf::from("/tmp/test.toml");
        let resolved = resolve_config(&config, Some(path.clone()));
        assert_eq!(resolved.connection.host, "10.0.0.1");
        assert_eq!(resolved.connection.port, 9444);
        assert_eq!(resolved.connection.timeout_ms, 5000);
        assert_eq!(resolved.daemon.buffer_capacity, 500);
        assert_eq!(resolved.daemon.reconnect_max_attempts, 2);
        assert_eq!(
            resolved.daemon.runtime_dir,
            Some(PathBuf::from("/tmp/custom"))
        );
        assert_eq!(resolved.output.format, "pretty");
        assert_eq!(resolved.config_path, Some(path));
    }

    #[test]
    fn resolve_port_zero_uses_default() {
        let config = ConfigFile {
            connection: ConnectionConfig {
                port: Some(0),
                ..ConnectionConfig::default()
            },
            ..ConfigFile::default()
        };
        let resolved = resolve_config(&config, None);
        assert_eq!(resolved.connection.port, DEFAULT_PORT);
    }

    #[test]
    fn init_config_creates_file() {
        let dir = std::env::temp_dir().join("webctl-test-config-init");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("config.toml");

        let result = init_config_to(&path);
        assert!(result.is_ok());
        assert!(path.exists());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[connection]"));
        assert!(contents.contains("port = 9222"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn init_config_refuses_overwrite() {
        let dir = std::env::temp_dir().join("webctl-test-config-overwrite");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "existing").unwrap();

        let result = init_config_to(&path);
        assert!(matches!(result, Err(ConfigError::AlreadyExists(_))));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "existing");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn find_config_with_explicit_path() {
        let dir = std::env::temp_dir().join("webctl-test-find-explicit");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("my-config.toml");
        std::fs::write(&path, "").unwrap();

        let found = find_config_file_with(Some(&path), None);
        assert_eq!(found, Some(path.clone()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn find_config_with_env_var() {
        let dir = std::env::temp_dir().join("webctl-test-find-env");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("env-config.toml");
        std::fs::write(&path, "").unwrap();

        let found = find_config_file_with(None, Some(path.to_string_lossy().into_owned()));
        assert_eq!(found, Some(path.clone()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn find_config_explicit_takes_priority_over_env() {
        let dir = std::env::temp_dir().join("webctl-test-find-priority");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let explicit = dir.join("explicit.toml");
        let env = dir.join("env.toml");
        std::fs::write(&explicit, "").unwrap();
        std::fs::write(&env, "").unwrap();

        let found =
            find_config_file_with(Some(&explicit), Some(env.to_string_lossy().into_owned()));
        assert_eq!(found, Some(explicit.clone()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn find_config_nonexistent_returns_none() {
        let found = find_config_file_with(
            Some(Path::new("/nonexistent/path.toml")),
            Some("/also/nonexistent.toml".into()),
        );
        if let Some(ref p) = found {
            assert_ne!(p, &PathBuf::from("/nonexistent/path.toml"));
            assert_ne!(p, &PathBuf::from("/also/nonexistent.toml"));
        }
    }

    #[test]
    fn load_config_from_nonexistent_returns_default() {
        let config = load_config_from(Path::new("/nonexistent/config.toml"));
        assert!(config.connection.host.is_none());
    }

    #[test]
    fn config_error_display() {
        assert!(
            ConfigError::NoConfigDir
                .to_string()
                .contains("config directory")
        );

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(ConfigError::Io(io_err).to_string().contains("denied"));

        let path = PathBuf::from("/tmp/test.toml");
        let msg = ConfigError::AlreadyExists(path).to_string();
        assert!(msg.contains("already exists"));
        assert!(msg.contains("/tmp/test.toml"));
    }

    #[test]
    fn config_serializes_to_json() {
        let config = ConfigFile::default();
        let resolved = resolve_config(&config, None);
        let json = serde_json::to_string(&resolved).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["connection"]["port"], 9222);
        assert_eq!(parsed["connection"]["host"], "127.0.0.1");
        assert_eq!(parsed["output"]["format"], "json");
    }
}
