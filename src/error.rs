use std::fmt;

use serde::Serialize;

/// Process exit codes, one per broad error taxonomy bucket.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    ConnectionError = 2,
    TargetError = 3,
    TimeoutError = 4,
    ProtocolError = 5,
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::GeneralError => write!(f, "general error"),
            Self::ConnectionError => write!(f, "connection error"),
            Self::TargetError => write!(f, "target error"),
            Self::TimeoutError => write!(f, "timeout error"),
            Self::ProtocolError => write!(f, "protocol error"),
        }
    }
}

/// The taxonomy kinds named by the error-handling design: each maps onto
/// exactly one `ExitCode`, but several kinds share a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Deadline,
    CdpError,
    ConnectionLost,
    NotRunning,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::InvalidArgument | Self::NotFound | Self::Internal => ExitCode::GeneralError,
            Self::ConnectionLost | Self::NotRunning => ExitCode::ConnectionError,
            Self::Deadline => ExitCode::TimeoutError,
            Self::CdpError => ExitCode::ProtocolError,
        }
    }

    /// `not-found` is rendered as a bare notice, without the `Error: ` prefix.
    #[must_use]
    pub fn is_notice(self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Unified application error. Carries a human message, the exit code it maps
/// to, and an optional structured payload for responses that need more than
/// a string (used sparingly — most errors are plain text).
#[derive(Debug)]
pub struct AppError {
    pub message: String,
    pub code: ExitCode,
    pub custom_json: Option<serde_json::Value>,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: kind.exit_code(),
            custom_json: None,
        }
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// A `not-found` notice. Tags `custom_json` so callers that only have
    /// the `AppError` (not the originating `ErrorKind`) can still render it
    /// without the `Error: ` prefix, per the "empty, not an error" rule.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::NotFound, message);
        err.custom_json = Some(serde_json::json!({ "notice": true }));
        err
    }

    #[must_use]
    pub fn is_notice(&self) -> bool {
        self.custom_json
            .as_ref()
            .and_then(|v| v.get("notice"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn deadline(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deadline, message)
    }

    #[must_use]
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionLost, message)
    }

    #[must_use]
    pub fn not_running() -> Self {
        Self::new(ErrorKind::NotRunning, "no daemon is listening on the socket")
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    #[must_use]
    pub fn already_running() -> Self {
        Self::new(ErrorKind::InvalidArgument, "already running")
    }

    #[must_use]
    pub fn not_implemented(command: &str) -> Self {
        Self::new(ErrorKind::InvalidArgument, format!("{command}: not yet implemented"))
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        let output = ErrorOutput {
            error: &self.message,
            code: self.code as u8,
        };
        serde_json::to_string(&output).unwrap_or_else(|_| {
            format!(r#"{{"error":"{}","code":{}}}"#, self.message, self.code as u8)
        })
    }

    pub fn print_json_stderr(&self) {
        eprintln!("{}", self.to_json());
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_argument(format!("malformed json: {e}"))
    }
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: &'a str,
    code: u8,
}
