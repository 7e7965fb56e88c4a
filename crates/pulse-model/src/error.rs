//! Error taxonomy
//!
//! Errors are classified by how the pipeline reacts to them:
//! - Fatal at startup: configuration (incompatible source schema, bad knobs)
//! - Degraded: data unavailable (empty history becomes `insufficient_data`)
//! - Retried: transient model call failures
//! - Surfaced: non-transient call failures, validation failures, cancellation

use serde::Serialize;
use thiserror::Error;

pub type PulseResult<T> = Result<T, PulseError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PulseError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("model call failed after {attempts} attempt(s): {message}")]
    TransientCall { attempts: u32, message: String },

    #[error("model call rejected: {0}")]
    NonTransientCall(String),

    #[error("model output failed validation: {0}")]
    Validation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("source error: {0}")]
    Source(String),
}

/// Stable, machine-readable error codes. These strings are part of the
/// external contract and must not change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "PULSE_CONFIGURATION")]
    Configuration,
    #[serde(rename = "PULSE_DATA_UNAVAILABLE")]
    DataUnavailable,
    #[serde(rename = "PULSE_TRANSIENT_CALL")]
    TransientCall,
    #[serde(rename = "PULSE_NON_TRANSIENT_CALL")]
    NonTransientCall,
    #[serde(rename = "PULSE_VALIDATION")]
    Validation,
    #[serde(rename = "PULSE_INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "PULSE_CANCELLED")]
    Cancelled,
    #[serde(rename = "PULSE_SOURCE")]
    Source,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Configuration => "PULSE_CONFIGURATION",
            ErrorCode::DataUnavailable => "PULSE_DATA_UNAVAILABLE",
            ErrorCode::TransientCall => "PULSE_TRANSIENT_CALL",
            ErrorCode::NonTransientCall => "PULSE_NON_TRANSIENT_CALL",
            ErrorCode::Validation => "PULSE_VALIDATION",
            ErrorCode::InvalidRequest => "PULSE_INVALID_REQUEST",
            ErrorCode::Cancelled => "PULSE_CANCELLED",
            ErrorCode::Source => "PULSE_SOURCE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PulseError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PulseError::Configuration(_) => ErrorCode::Configuration,
            PulseError::DataUnavailable(_) => ErrorCode::DataUnavailable,
            PulseError::TransientCall { .. } => ErrorCode::TransientCall,
            PulseError::NonTransientCall(_) => ErrorCode::NonTransientCall,
            PulseError::Validation(_) => ErrorCode::Validation,
            PulseError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            PulseError::Cancelled => ErrorCode::Cancelled,
            PulseError::Source(_) => ErrorCode::Source,
        }
    }

    /// Fatal errors abort startup instead of failing a single request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PulseError::Configuration(_))
    }
}

/// Serializable error representation handed to the API layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&PulseError> for ErrorReport {
    fn from(err: &PulseError) -> Self {
        ErrorReport {
            code: err.code(),
            message: err.to_string(),
        }
    }
}
