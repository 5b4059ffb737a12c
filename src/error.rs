use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Main Error Type
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    // Convenience constructors
    pub fn missing_identifier(what: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::MissingIdentifier,
            format!("{} is required", what.into()),
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransportError, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DecodeError, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Operation cancelled")
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BackendSignaled, message)
    }

    pub fn mutation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MutationError, message)
    }

    pub fn timeout(what: impl Into<String>, secs: u64) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("{} timed out after {}s", what.into(), secs),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PersistenceError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

// ============================================================================
// Error Codes
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Recovered locally
    DecodeError,
    TransportError,
    Timeout,
    MutationError,

    // Terminal for the caller
    Cancelled,
    BackendSignaled,
    MissingIdentifier,

    // Ambient
    ConfigError,
    PersistenceError,
    Internal,
}

impl ErrorCode {
    /// Transport-level failures are the only class worth reconnecting for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportError | Self::Timeout)
    }

    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::MissingIdentifier | Self::ConfigError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DecodeError => "DECODE_ERROR",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::MutationError => "MUTATION_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::BackendSignaled => "BACKEND_ERROR",
            Self::MissingIdentifier => "MISSING_IDENTIFIER",
            Self::ConfigError => "CONFIG_ERROR",
            Self::PersistenceError => "PERSISTENCE_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

pub type Result<T> = std::result::Result<T, AppError>;

// ============================================================================
// Error Conversion Implementations
// ============================================================================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(format!("IO error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(ErrorCode::Timeout, format!("HTTP timeout: {}", err))
        } else if err.is_decode() {
            Self::decode(format!("HTTP body error: {}", err))
        } else {
            Self::transport(format!("HTTP error: {}", err))
        }
    }
}

impl From<reqwest::header::InvalidHeaderValue> for AppError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::config(format!("Invalid header: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::transport(format!("WebSocket error: {}", err))
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        Self::config(format!("Invalid URL: {}", err))
    }
}

// ============================================================================
// Error Context Extension
// ============================================================================

pub trait ErrorContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<AppError>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let mut err = e.into();
            err.message = format!("{}: {}", context.into(), err.message);
            err
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn log_error(error: &AppError) {
    match error.code {
        ErrorCode::Cancelled => log::debug!("{}", error),
        c if c.is_retryable() || c.is_caller_error() => log::warn!("{}", error),
        _ => log::error!("{}", error),
    }
}

/// Rejects empty or whitespace-only identifiers before any network call.
pub fn require_id<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppError::missing_identifier(what))
    } else {
        Ok(trimmed)
    }
}

// ============================================================================
// Tests
// ============================================================================
