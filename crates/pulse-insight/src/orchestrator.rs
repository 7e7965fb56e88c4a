//! Generative call orchestration
//!
//! One logical call per request, driven through an explicit state machine:
//!
//! ```text
//!   Pending ──► Calling ──► Succeeded
//!                  │  ▲
//!                  ▼  │
//!               Retrying      (transient failure, budget left)
//!                  │
//!                  ▼
//!               Failed        (budget exhausted or non-transient failure)
//! ```
//!
//! Every attempt runs under a hard deadline. A response that fails validation
//! counts as a transient failure and is retried like a timeout would be.
//! Cancellation is checked at both suspension points (the model call and the
//! backoff sleep) and ends the call in `Cancelled`.

use crate::cancel::CancelToken;
use crate::config::{ModelConfig, MAX_TEMPERATURE};
use crate::llm::{CallError, CompletionRequest, GenerativeClient};
use crate::prompt::{RenderedPrompt, TemplateKind};
use crate::validate::ValidationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_model::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Upper bound applied to server-provided retry-after hints.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

// ============================================================================
// Backoff
// ============================================================================

pub trait Backoff: Send + Sync {
    /// Delay before the attempt following `attempt` (1-based).
    fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

impl Backoff for RetryPolicy {
    fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let scaled = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        let computed = Duration::from_millis(scaled);
        match retry_after {
            Some(hint) => computed.max(hint.min(MAX_RETRY_AFTER)),
            None => computed,
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock: sleeps return immediately, advance `now` and are recorded.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

#[async_trait]
impl Clock for ManualClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }

    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// Call trace
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Pending,
    Calling,
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Succeeded | CallState::Failed | CallState::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Transient(String),
    NonTransient(String),
    Invalid(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: AttemptOutcome,
    /// Delay slept before the next attempt, if one followed.
    pub backoff_ms: Option<u64>,
}

/// Audit record of one logical call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallTrace {
    pub correlation_id: Uuid,
    pub template: TemplateKind,
    pub prompt_digest: String,
    pub model: String,
    pub transitions: Vec<CallState>,
    pub attempts: Vec<AttemptRecord>,
}

impl CallTrace {
    fn new(correlation_id: Uuid, prompt: &RenderedPrompt, model: String) -> Self {
        Self {
            correlation_id,
            template: prompt.kind,
            prompt_digest: prompt.digest.clone(),
            model,
            transitions: vec![CallState::Pending],
            attempts: Vec::new(),
        }
    }

    pub fn state(&self) -> CallState {
        self.transitions.last().copied().unwrap_or(CallState::Pending)
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    fn transition(&mut self, next: CallState) {
        tracing::trace!(from = ?self.state(), to = ?next, "call state");
        self.transitions.push(next);
    }
}

pub struct CallOutcome<T> {
    pub result: PulseResult<T>,
    pub trace: CallTrace,
}

enum Failure {
    Call(CallError),
    Invalid(ValidationError),
}

impl Failure {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Failure::Call(err) => err.retry_after(),
            Failure::Invalid(_) => None,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            Failure::Call(err) => err.is_transient(),
            Failure::Invalid(_) => true,
        }
    }

    fn record(&self) -> AttemptOutcome {
        match self {
            Failure::Call(err) if err.is_transient() => AttemptOutcome::Transient(err.to_string()),
            Failure::Call(err) => AttemptOutcome::NonTransient(err.to_string()),
            Failure::Invalid(err) => AttemptOutcome::Invalid(err.to_string()),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Call(err) => write!(f, "{err}"),
            Failure::Invalid(err) => write!(f, "{err}"),
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    client: Arc<dyn GenerativeClient>,
    clock: Arc<dyn Clock>,
    backoff: Arc<dyn Backoff>,
    max_attempts: u32,
    temperature: f32,
    timeout: Duration,
    max_tokens: u32,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn GenerativeClient>, config: &ModelConfig) -> PulseResult<Self> {
        if !(0.0..=MAX_TEMPERATURE).contains(&config.temperature) {
            return Err(PulseError::Configuration(format!(
                "temperature {} is outside 0.0..={MAX_TEMPERATURE}",
                config.temperature
            )));
        }
        if config.retry.max_attempts == 0 {
            return Err(PulseError::Configuration("max_attempts must be at least 1".into()));
        }
        Ok(Self {
            client,
            clock: Arc::new(TokioClock),
            backoff: Arc::new(config.retry.clone()),
            max_attempts: config.retry.max_attempts,
            temperature: config.temperature,
            timeout: config.timeout(),
            max_tokens: config.max_tokens,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn model_name(&self) -> String {
        self.client.model_name()
    }

    /// Run the call, validating each response with `validate`.
    pub async fn run<T, F>(&self, prompt: &RenderedPrompt, cancel: &CancelToken, validate: F) -> CallOutcome<T>
    where
        F: Fn(&str) -> Result<T, ValidationError>,
    {
        let correlation_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "model_call",
            %correlation_id,
            template = prompt.kind.as_str(),
        );
        self.run_attempts(correlation_id, prompt, cancel, validate)
            .instrument(span)
            .await
    }

    async fn run_attempts<T, F>(
        &self,
        correlation_id: Uuid,
        prompt: &RenderedPrompt,
        cancel: &CancelToken,
        validate: F,
    ) -> CallOutcome<T>
    where
        F: Fn(&str) -> Result<T, ValidationError>,
    {
        let mut trace = CallTrace::new(correlation_id, prompt, self.client.model_name());
        let request = CompletionRequest {
            system: prompt.system.clone(),
            user: prompt.user.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: self.timeout,
            json_mode: true,
        };

        let mut last_failure: Option<Failure> = None;
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return cancelled(trace);
            }
            trace.transition(CallState::Calling);
            let started_at = self.clock.now();
            let started = tokio::time::Instant::now();

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace.attempts.push(AttemptRecord {
                        attempt,
                        started_at,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        outcome: AttemptOutcome::Cancelled,
                        backoff_ms: None,
                    });
                    return cancelled(trace);
                }
                reply = tokio::time::timeout(self.timeout, self.client.complete(&request)) => reply,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let checked = match reply {
                Err(_) => Err(Failure::Call(CallError::Timeout(self.timeout))),
                Ok(Err(err)) => Err(Failure::Call(err)),
                Ok(Ok(text)) => validate(&text).map_err(Failure::Invalid),
            };

            let failure = match checked {
                Ok(value) => {
                    trace.attempts.push(AttemptRecord {
                        attempt,
                        started_at,
                        elapsed_ms,
                        outcome: AttemptOutcome::Succeeded,
                        backoff_ms: None,
                    });
                    trace.transition(CallState::Succeeded);
                    tracing::info!(attempt, elapsed_ms, "model call succeeded");
                    return CallOutcome {
                        result: Ok(value),
                        trace,
                    };
                }
                Err(failure) => failure,
            };

            trace.attempts.push(AttemptRecord {
                attempt,
                started_at,
                elapsed_ms,
                outcome: failure.record(),
                backoff_ms: None,
            });

            if !failure.is_transient() {
                tracing::error!(attempt, error = %failure, "model call rejected");
                trace.transition(CallState::Failed);
                return CallOutcome {
                    result: Err(PulseError::NonTransientCall(failure.to_string())),
                    trace,
                };
            }

            tracing::warn!(attempt, max_attempts = self.max_attempts, error = %failure, "model attempt failed");
            if attempt == self.max_attempts {
                last_failure = Some(failure);
                break;
            }

            trace.transition(CallState::Retrying);
            let delay = self.backoff.delay(attempt, failure.retry_after());
            if let Some(record) = trace.attempts.last_mut() {
                record.backoff_ms = Some(delay.as_millis() as u64);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(trace),
                _ = self.clock.sleep(delay) => {}
            }
            last_failure = Some(failure);
        }

        trace.transition(CallState::Failed);
        let attempts = trace.attempt_count();
        let error = match last_failure {
            Some(Failure::Invalid(err)) => PulseError::from(err),
            Some(failure) => PulseError::TransientCall {
                attempts,
                message: failure.to_string(),
            },
            None => PulseError::TransientCall {
                attempts,
                message: "no attempt was made".to_string(),
            },
        };
        tracing::error!(attempts, error = %error, "model call failed");
        CallOutcome {
            result: Err(error),
            trace,
        }
    }
}

fn cancelled<T>(mut trace: CallTrace) -> CallOutcome<T> {
    tracing::info!("model call cancelled");
    trace.transition(CallState::Cancelled);
    CallOutcome {
        result: Err(PulseError::Cancelled),
        trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptLimits;
    use crate::llm::{MockClient, MockReply};
    use crate::prompt::PromptAssembler;
    use chrono::TimeZone;

    fn prompt() -> RenderedPrompt {
        PromptAssembler::new(PromptLimits::default())
            .triage(&serde_json::json!({"query": "vibe for c1"}))
            .unwrap()
    }

    fn accept(text: &str) -> Result<String, ValidationError> {
        Ok(text.to_string())
    }

    fn orchestrator(client: Arc<MockClient>, clock: Arc<ManualClock>) -> Orchestrator {
        Orchestrator::new(client, &ModelConfig::default())
            .unwrap()
            .with_clock(clock)
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1, None), Duration::from_millis(250));
        assert_eq!(policy.delay(2, None), Duration::from_millis(500));
        assert_eq!(policy.delay(4, None), Duration::from_millis(2000));
        assert_eq!(policy.delay(40, None), Duration::from_millis(2000));
    }

    #[test]
    fn test_retry_after_raises_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay(1, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay(1, Some(Duration::from_secs(600))),
            MAX_RETRY_AFTER
        );
        assert_eq!(
            policy.delay(3, Some(Duration::from_millis(10))),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn test_high_temperature_is_configuration_error() {
        let config = ModelConfig {
            temperature: 0.9,
            ..ModelConfig::default()
        };
        let result = Orchestrator::new(Arc::new(MockClient::always("{}")), &config);
        assert!(matches!(result, Err(PulseError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_flaky_then_success() {
        let client = Arc::new(MockClient::flaky(2, "ok"));
        let clock = clock();
        let orch = orchestrator(client.clone(), clock.clone());

        let outcome = orch.run(&prompt(), &CancelToken::new(), accept).await;
        assert_eq!(outcome.result.unwrap(), "ok");
        assert_eq!(outcome.trace.attempt_count(), 3);
        assert_eq!(outcome.trace.state(), CallState::Succeeded);
        assert_eq!(
            outcome.trace.transitions,
            vec![
                CallState::Pending,
                CallState::Calling,
                CallState::Retrying,
                CallState::Calling,
                CallState::Retrying,
                CallState::Calling,
                CallState::Succeeded,
            ]
        );
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(250), Duration::from_millis(500)]
        );
        assert_eq!(client.calls(), 3);
        assert_eq!(client.requests()[0].temperature, 0.2);
    }

    #[tokio::test]
    async fn test_always_transient_fails_at_budget() {
        let client = Arc::new(MockClient::failing(CallError::Network("reset".into())));
        let orch = orchestrator(client.clone(), clock());

        let outcome = orch.run(&prompt(), &CancelToken::new(), accept).await;
        match outcome.result {
            Err(PulseError::TransientCall { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected transient failure, got {other:?}"),
        }
        assert_eq!(client.calls(), 3);
        assert_eq!(outcome.trace.state(), CallState::Failed);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let client = Arc::new(MockClient::failing(CallError::Auth {
            status: 401,
            message: "bad key".into(),
        }));
        let orch = orchestrator(client.clone(), clock());

        let outcome = orch.run(&prompt(), &CancelToken::new(), accept).await;
        assert!(matches!(outcome.result, Err(PulseError::NonTransientCall(_))));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_output_retried_then_surfaced() {
        let client = Arc::new(MockClient::always("not json"));
        let orch = orchestrator(client.clone(), clock());

        let outcome = orch
            .run(&prompt(), &CancelToken::new(), |_| -> Result<(), _> {
                Err(ValidationError::NoJson)
            })
            .await;
        assert!(matches!(outcome.result, Err(PulseError::Validation(_))));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_attempt_times_out() {
        let client = Arc::new(MockClient::new(vec![
            MockReply::Hang,
            MockReply::Text("late".into()),
        ]));
        let orch = orchestrator(client.clone(), clock());

        let outcome = orch.run(&prompt(), &CancelToken::new(), accept).await;
        assert_eq!(outcome.result.unwrap(), "late");
        assert!(matches!(
            outcome.trace.attempts[0].outcome,
            AttemptOutcome::Transient(_)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let client = Arc::new(MockClient::always("ok"));
        let orch = orchestrator(client.clone(), clock());
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = orch.run(&prompt(), &cancel, accept).await;
        assert_eq!(outcome.result, Err(PulseError::Cancelled));
        assert_eq!(outcome.trace.state(), CallState::Cancelled);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_call() {
        let client = Arc::new(MockClient::new(vec![MockReply::Hang]));
        let orch = orchestrator(client, clock());
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = orch.run(&prompt(), &cancel, accept).await;
        assert_eq!(outcome.result, Err(PulseError::Cancelled));
        assert_eq!(outcome.trace.attempts[0].outcome, AttemptOutcome::Cancelled);
    }
}
