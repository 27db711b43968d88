use serde::{Deserialize, Serialize};

/// Error body returned by the API alongside non-2xx statuses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorBody {
    pub const ILLEGAL_TRANSITION: &'static str = "ILLEGAL_TRANSITION";
    pub const CANCELLATION_WINDOW_EXPIRED: &'static str = "CANCELLATION_WINDOW_EXPIRED";

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: &str) -> Self {
        Self {
            message: message.into(),
            code: Some(code.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    NotFound(String),
    /// The collaborator refused the request as invalid (400/422).
    Rejected(String),
    /// Concurrent modification or overlapping booking (409).
    Conflict(String),
    IllegalTransition(String),
    CancellationWindowExpired(String),
    /// Session expired and could not be refreshed.
    Unauthorized,
    /// Unreachable, or an unexpected status or payload.
    Transport(String),
}

impl ApiError {
    /// Build an error from a response status and its (possibly empty) body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_else(|_| ErrorBody::new(body.trim()));
        let message = if parsed.message.is_empty() {
            format!("HTTP {status}")
        } else {
            parsed.message
        };
        match status {
            401 => ApiError::Unauthorized,
            404 => ApiError::NotFound(message),
            409 => ApiError::Conflict(message),
            400 | 422 => match parsed.code.as_deref() {
                Some(ErrorBody::ILLEGAL_TRANSITION) => ApiError::IllegalTransition(message),
                Some(ErrorBody::CANCELLATION_WINDOW_EXPIRED) => ApiError::CancellationWindowExpired(message),
                _ => ApiError::Rejected(message),
            },
            _ => ApiError::Transport(format!("HTTP {status}: {message}")),
        }
    }

    /// Status and body the API uses for this error.
    pub fn to_status(&self) -> (u16, ErrorBody) {
        match self {
            ApiError::NotFound(m) => (404, ErrorBody::new(m.clone())),
            ApiError::Rejected(m) => (400, ErrorBody::new(m.clone())),
            ApiError::Conflict(m) => (409, ErrorBody::new(m.clone())),
            ApiError::IllegalTransition(m) => (400, ErrorBody::with_code(m.clone(), ErrorBody::ILLEGAL_TRANSITION)),
            ApiError::CancellationWindowExpired(m) => (
                400,
                ErrorBody::with_code(m.clone(), ErrorBody::CANCELLATION_WINDOW_EXPIRED),
            ),
            ApiError::Unauthorized => (401, ErrorBody::new("unauthorized")),
            ApiError::Transport(m) => (502, ErrorBody::new(m.clone())),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound(m) => write!(f, "not found: {m}"),
            ApiError::Rejected(m) => write!(f, "rejected: {m}"),
            ApiError::Conflict(m) => write!(f, "conflict: {m}"),
            ApiError::IllegalTransition(m) => write!(f, "illegal transition: {m}"),
            ApiError::CancellationWindowExpired(m) => write!(f, "cancellation window expired: {m}"),
            ApiError::Unauthorized => write!(f, "session expired"),
            ApiError::Transport(m) => write!(f, "transport error: {m}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}
