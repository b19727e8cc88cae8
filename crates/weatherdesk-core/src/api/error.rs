use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Login failed: {reason}")]
    LoginFailed { reason: String },

    #[error("Registration failed: {reason}")]
    RegistrationFailed { reason: String },

    #[error("Unauthorized - session has expired or was rejected")]
    Unauthorized,

    #[error("{}", format_request_failed(*status, message))]
    RequestFailed {
        status: Option<u16>,
        message: String,
    },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Reason reported when no response was received at all.
pub(crate) const NETWORK_FAILURE_REASON: &str =
    "Unable to connect to server. Check your internet connection.";

/// Reason reported when the transport gave up waiting.
pub(crate) const TIMEOUT_REASON: &str = "Connection timed out. Please try again.";

fn format_request_failed(status: Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("Request failed (status {}): {}", code, message),
        None => format!("Request failed: {}", message),
    }
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Best-effort human readable message from an error response body.
    ///
    /// Prefers a JSON `message` field, then `error`, then the raw body, and
    /// finally the canonical reason for the status code.
    pub fn message_from_body(status: StatusCode, body: &str) -> String {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
            for key in ["message", "error"] {
                if let Some(Value::String(text)) = map.get(key) {
                    if !text.trim().is_empty() {
                        return text.clone();
                    }
                }
            }
        }

        let trimmed = body.trim();
        if !trimmed.is_empty() {
            return Self::truncate_body(trimmed);
        }

        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    }

    /// Classify a non-success status from a pipeline request.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 | 403 => ApiError::Unauthorized,
            code => ApiError::RequestFailed {
                status: Some(code),
                message: Self::message_from_body(status, body),
            },
        }
    }

    /// Reason text for a transport failure where no response arrived.
    pub(crate) fn transport_reason(err: &reqwest::Error) -> &'static str {
        if err.is_timeout() {
            TIMEOUT_REASON
        } else {
            NETWORK_FAILURE_REASON
        }
    }

    /// A transport failure on a pipeline request.
    pub(crate) fn network(err: &reqwest::Error) -> Self {
        ApiError::RequestFailed {
            status: err.status().map(|s| s.as_u16()),
            message: Self::transport_reason(err).to_string(),
        }
    }

    /// True when this error tore down (or would tear down) the session.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RequestFailed { status, .. } => *status,
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
