//! Per-user runtime directory: PID file and IPC socket path.
//!
//! Layout and atomic-write discipline are grounded in the session-file
//! persistence pattern used elsewhere in this codebase (write to a `.tmp`
//! sibling, set restrictive permissions, then rename).

use std::path::PathBuf;

use crate::error::AppError;

/// Directory name under the resolved base (`$XDG_RUNTIME_DIR` or the cache dir).
const DIR_NAME: &str = "webctl";

/// Resolve the per-user runtime directory, creating it with mode 0700 if absent.
///
/// # Errors
///
/// Returns `AppError` if the directory cannot be created.
pub fn runtime_dir() -> Result<PathBuf, AppError> {
    let dir = runtime_base().join(DIR_NAME);
    std::fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(dir)
}

fn runtime_base() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::cache_dir()
        .map(|d| d.join("webctl-run"))
        .unwrap_or_else(|| std::env::temp_dir().join("webctl-run"))
}

/// Path to the daemon's PID file.
///
/// # Errors
///
/// Returns `AppError` if the runtime directory cannot be resolved.
pub fn pid_file_path() -> Result<PathBuf, AppError> {
    Ok(runtime_dir()?.join("daemon.pid"))
}

/// Path to the daemon's IPC socket.
///
/// # Errors
///
/// Returns `AppError` if the runtime directory cannot be resolved.
pub fn socket_path() -> Result<PathBuf, AppError> {
    Ok(runtime_dir()?.join("daemon.sock"))
}

/// Atomically write the current process id to the PID file with mode 0600.
///
/// # Errors
///
/// Returns `AppError` on I/O failure.
pub fn write_pid_file(pid: u32) -> Result<(), AppError> {
    let path = pid_file_path()?;
    let tmp = path.with_extension("pid.tmp");
    std::fs::write(&tmp, pid.to_string())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Read the PID recorded in the PID file, if any.
///
/// # Errors
///
/// Returns `AppError` if the file exists but cannot be parsed.
pub fn read_pid_file() -> Result<Option<u32>, AppError> {
    let path = pid_file_path()?;
    match std::fs::read_to_string(&path) {
        Ok(contents) => contents
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| AppError::internal(format!("malformed pid file: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove the PID file, ignoring "not found".
///
/// # Errors
///
/// Returns `AppError` on I/O errors other than "not found".
pub fn remove_pid_file() -> Result<(), AppError> {
    let path = pid_file_path()?;
    match std::fs::remove_file(&path) {
        Ok(()) | Err(_) if !path.exists() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Remove the socket file, ignoring "not found".
///
/// # Errors
///
/// Returns `AppError` on I/O errors other than "not found".
pub fn remove_socket_file() -> Result<(), AppError> {
    let path = socket_path()?;
    match std::fs::remove_file(&path) {
        Ok(()) | Err(_) if !path.exists() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Check whether a PID recorded on disk still refers to a live process.
#[cfg(unix)]
#[must_use]
pub fn process_is_alive(pid: u32) -> bool {
    // SAFETY: signal 0 is a null signal used only for existence checks.
    #[allow(clippy::cast_possible_wrap)]
    let result = unsafe { libc::kill(pid as i32, 0) };
    result == 0
}

#[cfg(not(unix))]
#[must_use]
pub fn process_is_alive(_pid: u32) -> bool {
    false
}

/// Whether a daemon appears to already be running: a PID file exists, names
/// a live process, and the socket file is present.
///
/// # Errors
///
/// Returns `AppError` if the runtime directory cannot be resolved.
pub fn daemon_already_running() -> Result<bool, AppError> {
    let Some(pid) = read_pid_file()? else {
        return Ok(false);
    };
    if !process_is_alive(pid) {
        return Ok(false);
    }
    Ok(socket_path()?.exists())
}

/// Format the current time as a simplified ISO 8601 string (e.g.
/// `"2026-02-11T12:00:00Z"`), used for log lines and `status` responses.
///
/// Uses the Howard Hinnant algorithm for civil date computation from a Unix
/// timestamp, avoiding a chrono dependency for a single formatting need.
#[must_use]
pub fn now_iso8601() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    format_unix_secs(secs)
}

#[allow(
    clippy::similar_names,
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn format_unix_secs(secs: u64) -> String {
    let day_secs = secs % 86_400;
    let hours = day_secs / 3_600;
    let minutes = (day_secs % 3_600) / 60;
    let seconds = day_secs % 60;

    let mut days = (secs / 86_400) as i64;
    days += 719_468; // shift epoch from 1970-01-01 to 0000-03-01
    let era = if days >= 0 { days } else { days - 146_096 } / 146_097;
    let day_of_era = (days - era * 146_097) as u32; // [0, 146096]
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36524 - day_of_era / 146_096) / 365;
    let y = i64::from(year_of_era) + era * 400;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100); // [0, 365]
    let mp = (5 * day_of_year + 2) / 153; // month index [0, 11]
    let d = day_of_year - (153 * mp + 2) / 5 + 1; // day [1, 31]
    let m = if mp < 10 { mp + 3 } else { mp - 9 }; // month [1, 12]
    let y = if m <= 2 { y + 1 } else { y };

    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}
