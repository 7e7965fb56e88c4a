//! Optic Pulse insight pipeline
//!
//! Turns canonical retail records into validated generative insights:
//!
//! ```text
//!   JoinPlan ──► AggregationEngine ──► PromptAssembler ──► Orchestrator ──► validate
//!   (storage)    (summary / voice)     (templates)        (retries)        (typed result)
//! ```
//!
//! - [`aggregate`], [`persona`], [`voice`]: deterministic, pure aggregation
//! - [`prompt`]: slot-based templates with a byte budget and truncation record
//! - [`orchestrator`]: retry state machine with injectable clock and backoff
//! - [`validate`]: JSON extraction, repairs and structural checks
//! - [`llm`]: model clients (HTTP providers behind the `http` feature, mock)
//! - [`service`]: [`PulseRuntime`], the lifecycle owner and operation entry points
//!
//! # Example
//!
//! ```rust,ignore
//! use pulse_insight::{CancelToken, PulseConfig, PulseRuntime, UnifiedClient};
//! use pulse_model::VibeReportRequest;
//! use std::sync::Arc;
//!
//! let config = PulseConfig::from_env()?;
//! let client = Arc::new(UnifiedClient::from_config(&config.model)?);
//! let runtime = PulseRuntime::start(config, client)?;
//! let insight = runtime
//!     .vibe_report(&VibeReportRequest::new("42"), &CancelToken::new())
//!     .await?;
//! println!("{}", insight.value.persona_label);
//! runtime.shutdown();
//! ```

pub mod aggregate;
pub mod cancel;
pub mod config;
pub mod llm;
pub mod orchestrator;
pub mod persona;
pub mod prompt;
pub mod render;
pub mod service;
pub mod triage;
pub mod validate;
pub mod voice;

pub use aggregate::{summarize, AggregationEngine};
pub use cancel::CancelToken;
pub use config::{ModelConfig, PromptLimits, Provider, PulseConfig, MAX_TEMPERATURE};
pub use llm::{CallError, CompletionRequest, GenerativeClient, MockClient, MockReply};
#[cfg(feature = "http")]
pub use llm::{AnthropicClient, LocalClient, OpenAIClient, UnifiedClient};
pub use orchestrator::{
    AttemptOutcome, AttemptRecord, Backoff, CallOutcome, CallState, CallTrace, Clock, ManualClock,
    Orchestrator, RetryPolicy, TokioClock,
};
pub use prompt::{PromptAssembler, PromptError, RenderedPrompt, TemplateKind, Truncation};
pub use render::{ManifestCardRenderer, VibeCard, VibeCardRenderer};
pub use service::{Insight, Processed, PulseRuntime};
pub use triage::{Triage, TriageDecision};
pub use validate::ValidationError;
