//! Generative model clients
//!
//! One seam, [`GenerativeClient`], with HTTP implementations for OpenAI-style
//! chat completions, Anthropic messages and local OpenAI-compatible servers,
//! plus a scripted [`MockClient`] for tests. Clients make exactly one request
//! per call; retries, timeouts and backoff live in the orchestrator.

mod mock;
#[cfg(feature = "http")]
mod providers;

pub use mock::{MockClient, MockReply};
#[cfg(feature = "http")]
pub use providers::{AnthropicClient, LocalClient, OpenAIClient, UnifiedClient};

use async_trait::async_trait;
use std::time::Duration;

// ============================================================================
// Client Interface
// ============================================================================

#[async_trait]
pub trait GenerativeClient: Send + Sync {
    /// Run one completion and return the raw response text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CallError>;

    fn model_name(&self) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-attempt deadline, also handed to the HTTP layer.
    pub timeout: Duration,
    /// Ask for a JSON object response where the provider supports it.
    pub json_mode: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("network error: {0}")]
    Network(String),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },
    #[error("request rejected ({status}): {message}")]
    BadRequest { status: u16, message: String },
    #[error("empty response")]
    Empty,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("client misconfigured: {0}")]
    Config(String),
}

impl CallError {
    /// Transient failures are retried; everything else fails the call at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CallError::Timeout(_)
                | CallError::RateLimited { .. }
                | CallError::Network(_)
                | CallError::Server { .. }
                | CallError::Empty
                | CallError::InvalidResponse(_)
        )
    }

    /// Server-provided lower bound for the next backoff.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CallError::RateLimited { retry_after_ms } => Some(Duration::from_millis(*retry_after_ms)),
            _ => None,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String, retry_after_secs: Option<u64>) -> Self {
        match status {
            429 => CallError::RateLimited {
                retry_after_ms: retry_after_secs.unwrap_or(1).saturating_mul(1000),
            },
            401 | 403 => CallError::Auth {
                status,
                message: body,
            },
            408 => CallError::Server {
                status,
                message: body,
            },
            s if s >= 500 => CallError::Server {
                status,
                message: body,
            },
            _ => CallError::BadRequest {
                status,
                message: body,
            },
        }
    }
}

impl From<CallError> for pulse_model::PulseError {
    fn from(err: CallError) -> Self {
        use pulse_model::PulseError;
        match err {
            CallError::Config(message) => PulseError::Configuration(message),
            err if err.is_transient() => PulseError::TransientCall {
                attempts: 1,
                message: err.to_string(),
            },
            err => PulseError::NonTransientCall(err.to_string()),
        }
    }
}
