use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Google Sheets API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("not connected to Google Sheets")]
    NotConnected,

    #[error("credentials file not found: {}", .0.display())]
    CredentialsNotFound(PathBuf),

    #[error("invalid service account key: {0}")]
    InvalidKey(String),

    #[error("failed to sign token assertion")]
    Signing,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SheetsResult<T> = Result<T, SheetsError>;

/// Why the spreadsheet could not be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("not_found")]
    NotFound,
    #[error("permission_denied")]
    PermissionDenied,
    #[error("invalid_credentials")]
    InvalidCredentials,
    #[error("cannot_connect")]
    CannotConnect,
}

impl ConnectionError {
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => ConnectionError::NotFound,
            403 => ConnectionError::PermissionDenied,
            401 => ConnectionError::InvalidCredentials,
            _ => ConnectionError::CannotConnect,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ConnectionError::NotFound => "not_found",
            ConnectionError::PermissionDenied => "permission_denied",
            ConnectionError::InvalidCredentials => "invalid_credentials",
            ConnectionError::CannotConnect => "cannot_connect",
        }
    }
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
}

impl SheetsError {
    /// Build an `Api` error, preferring the message of a Google error body
    pub(crate) fn api(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<GoogleErrorBody>(body)
            .map(|b| b.error.message)
            .unwrap_or_else(|_| body.to_string());
        SheetsError::Api { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ConnectionError::from_status(404).code(), "not_found");
        assert_eq!(ConnectionError::from_status(403).code(), "permission_denied");
        assert_eq!(ConnectionError::from_status(401).code(), "invalid_credentials");
        assert_eq!(ConnectionError::from_status(500).code(), "cannot_connect");
        assert_eq!(ConnectionError::from_status(429), ConnectionError::CannotConnect);
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error": {"code": 400, "message": "Unable to parse range: Nope!A:E", "status": "INVALID_ARGUMENT"}}"#;
        let err = SheetsError::api(400, body);
        assert_eq!(
            err.to_string(),
            "Google Sheets API returned 400: Unable to parse range: Nope!A:E"
        );

        let err = SheetsError::api(502, "Bad Gateway");
        assert_eq!(err.to_string(), "Google Sheets API returned 502: Bad Gateway");
    }
}
