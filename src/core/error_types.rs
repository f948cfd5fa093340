//! Shared constants for structured API errors.

use std::fmt;

pub const ERROR_TYPE_API: &str = "api_error";
pub const ERROR_TYPE_INVALID_REQUEST: &str = "invalid_request_error";
pub const ERROR_TYPE_AUTHENTICATION: &str = "authentication_error";
pub const ERROR_TYPE_PERMISSION: &str = "permission_error";
pub const ERROR_TYPE_NOT_FOUND: &str = "not_found_error";
pub const ERROR_TYPE_REQUEST_TOO_LARGE: &str = "request_too_large";
pub const ERROR_TYPE_RATE_LIMIT: &str = "rate_limit_error";
pub const ERROR_TYPE_TIMEOUT: &str = "timeout_error";
pub const ERROR_TYPE_OVERLOADED: &str = "overloaded_error";

/// Message of the terminal `error` event sent when an upstream stream breaks.
pub const STREAM_ERROR_MESSAGE: &str = "An unexpected error occurred during streaming.";

/// Anthropic-style error classification carried in `error.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Api,
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RequestTooLarge,
    RateLimit,
    Timeout,
    Overloaded,
}

impl ErrorType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Api => ERROR_TYPE_API,
            Self::InvalidRequest => ERROR_TYPE_INVALID_REQUEST,
            Self::Authentication => ERROR_TYPE_AUTHENTICATION,
            Self::Permission => ERROR_TYPE_PERMISSION,
            Self::NotFound => ERROR_TYPE_NOT_FOUND,
            Self::RequestTooLarge => ERROR_TYPE_REQUEST_TOO_LARGE,
            Self::RateLimit => ERROR_TYPE_RATE_LIMIT,
            Self::Timeout => ERROR_TYPE_TIMEOUT,
            Self::Overloaded => ERROR_TYPE_OVERLOADED,
        }
    }

    /// Classify an HTTP status the way Anthropic clients expect.
    pub const fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::Permission,
            404 => Self::NotFound,
            408 | 504 => Self::Timeout,
            413 => Self::RequestTooLarge,
            429 => Self::RateLimit,
            503 | 529 => Self::Overloaded,
            _ => Self::Api,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
