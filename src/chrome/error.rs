use std::fmt;

/// Errors that can occur while discovering or connecting to a running
/// Chrome instance over its HTTP debug endpoint. Launching Chrome itself
/// is an external collaborator's responsibility and has no errors here.
#[derive(Debug)]
pub enum ChromeError {
    /// HTTP request to Chrome's debug endpoint failed.
    HttpError(String),

    /// Failed to parse a response from Chrome.
    ParseError(String),

    /// The `DevToolsActivePort` file was not found.
    NoActivePort,

    /// No running Chrome instance could be discovered.
    NotRunning(String),

    /// An I/O error occurred.
    Io(std::io::Error),
}

impl fmt::Display for ChromeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpError(msg) => write!(f, "Chrome HTTP error: {msg}"),
            Self::ParseError(msg) => write!(f, "Chrome parse error: {msg}"),
            Self::NoActivePort => write!(f, "DevToolsActivePort file not found"),
            Self::NotRunning(detail) => {
                write!(
                    f,
                    "no running Chrome instance found with remote debugging: {detail}"
                )
            }
            Self::Io(e) => write!(f, "Chrome I/O error: {e}"),
        }
    }
}

impl std::error::Error for ChromeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChromeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ChromeError> for crate::error::AppError {
    fn from(e: ChromeError) -> Self {
        use crate::error::ErrorKind;
        let kind = match &e {
            Self::ParseError(_) | Self::Io(_) => ErrorKind::Internal,
            Self::HttpError(_) | Self::NotRunning(_) | Self::NoActivePort => {
                ErrorKind::ConnectionLost
            }
        };
        Self::new(kind, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_http_error() {
        let err = ChromeError::HttpError("connection refused".into());
        assert_eq!(err.to_string(), "Chrome HTTP error: connection refused");
    }

    #[test]
    fn display_parse_error() {
        let err = ChromeError::ParseError("invalid JSON".into());
        assert_eq!(err.to_string(), "Chrome parse error: invalid JSON");
    }

    #[test]
    fn display_no_active_port() {
        let err = ChromeError::NoActivePort;
        assert_eq!(err.to_string(), "DevToolsActivePort file not found");
    }

    #[test]
    fn display_not_running() {
        let err = ChromeError::NotRunning("port 9222 refused".into());
        assert_eq!(
            err.to_string(),
            "no running Chrome instance found with remote debugging: port 9222 refused"
        );
    }

    #[test]
    fn display_io() {
        let err = ChromeError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file gone",
        ));
        assert_eq!(err.to_string(), "Chrome I/O error: file gone");
    }

    #[test]
    fn error_source_is_none_for_non_io() {
        let err: &dyn std::error::Error = &ChromeError::NotRunning("no instance".into());
        assert!(err.source().is_none());
    }

    #[test]
    fn error_source_returns_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file gone");
        let err: &dyn std::error::Error = &ChromeError::Io(io_err);
        assert!(err.source().is_some());
    }
}
