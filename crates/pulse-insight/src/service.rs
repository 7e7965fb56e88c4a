//! Pulse runtime
//!
//! Owns the process-wide state (source pool, model client, renderer) with an
//! explicit `start` / `shutdown` lifecycle and runs the three operations:
//!
//! ```text
//!   request ─► validate ─► plan ─► execute ─► summarize ─► prompt ─► model ─► validate ─► result
//! ```
//!
//! Stages run strictly in that order inside one request. Requests share only
//! the read-only pool and the client.

use crate::aggregate::AggregationEngine;
use crate::cancel::CancelToken;
use crate::config::PulseConfig;
use crate::llm::GenerativeClient;
use crate::orchestrator::{CallTrace, Clock, Orchestrator, TokioClock};
use crate::prompt::PromptAssembler;
use crate::render::{ManifestCardRenderer, VibeCard, VibeCardRenderer};
use crate::triage::{Triage, TriageDecision};
use crate::validate::{validate_brand_voice, validate_receipt, validate_vibe};
use crate::voice;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pulse_model::{
    BrandVoiceRequest, CampaignText, ClonedCampaign, InsightKind, InsightResult, Outcome, PulseError,
    PulseResult, ReceiptRecommendation, SmartReceiptRequest, VibeProfile, VibeReportRequest,
};
use pulse_storage::SourcePool;
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

/// A validated result plus the audit trace of the model call behind it.
#[derive(Debug, Clone, Serialize)]
pub struct Insight<T> {
    pub value: T,
    pub trace: CallTrace,
}

#[derive(Debug, Clone, Serialize)]
pub struct Processed {
    pub decision: TriageDecision,
    pub result: InsightResult,
    pub traces: Vec<CallTrace>,
}

pub struct PulseRuntime {
    config: PulseConfig,
    pool: SourcePool,
    engine: AggregationEngine,
    assembler: PromptAssembler,
    orchestrator: Orchestrator,
    clock: Arc<dyn Clock>,
    renderer: Option<Arc<dyn VibeCardRenderer>>,
}

impl PulseRuntime {
    /// Validate the configuration, open the source and resolve its schema.
    /// An incompatible source fails here, before any request is served.
    pub fn start(config: PulseConfig, client: Arc<dyn GenerativeClient>) -> PulseResult<Self> {
        config.validate()?;
        let pool = SourcePool::open(&config.source)?;
        Self::with_pool(config, pool, client)
    }

    /// Start on an already opened pool.
    pub fn with_pool(
        config: PulseConfig,
        pool: SourcePool,
        client: Arc<dyn GenerativeClient>,
    ) -> PulseResult<Self> {
        config.validate()?;
        let orchestrator = Orchestrator::new(client, &config.model)?;
        let renderer = config
            .card_template
            .as_ref()
            .map(|path| Arc::new(ManifestCardRenderer::new(path)) as Arc<dyn VibeCardRenderer>);
        tracing::info!(
            pool_size = pool.size(),
            model = %orchestrator.model_name(),
            transactions = %pool.schema().transactions.table,
            "pulse runtime started"
        );
        Ok(Self {
            engine: AggregationEngine::new(pool.clone(), config.prompt.recent_transactions),
            assembler: PromptAssembler::new(config.prompt.clone()),
            orchestrator,
            clock: Arc::new(TokioClock),
            renderer,
            pool,
            config,
        })
    }

    /// Use `clock` for window anchoring and retry sleeps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.orchestrator = self.orchestrator.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn VibeCardRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    pub fn pool(&self) -> &SourcePool {
        &self.pool
    }

    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    /// Close the pool. Requests issued afterwards fail with a source error.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        tracing::info!("pulse runtime shut down");
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub async fn vibe_report(
        &self,
        request: &VibeReportRequest,
        cancel: &CancelToken,
    ) -> PulseResult<Insight<VibeProfile>> {
        request.validate()?;
        let span = tracing::info_span!("vibe_report", customer_id = %request.customer_id);
        async {
            let window = request.window(self.now(), self.config.window_months)?;
            let plan = self.engine.plan(&request.customer_id, window)?;
            let summary =
                cancellable(cancel, self.engine.summarize_plan(plan, &request.customer_id)).await?;
            if summary.insufficient_data {
                tracing::info!("no transactions in window, reporting insufficient data");
            }

            let prompt = self.assembler.vibe(&summary)?;
            let outcome = self
                .orchestrator
                .run(&prompt, cancel, |text| validate_vibe(text, &summary))
                .await;
            let mut value = outcome.result?;

            if let Some(renderer) = &self.renderer {
                match renderer.render(&VibeCard::from_profile(&value)) {
                    Ok(path) => value.vibe_card_path = Some(path.display().to_string()),
                    Err(err) => tracing::warn!(error = %err, "vibe card not rendered"),
                }
            }
            Ok::<_, PulseError>(Insight {
                value,
                trace: outcome.trace,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn brand_voice(
        &self,
        request: &BrandVoiceRequest,
        cancel: &CancelToken,
    ) -> PulseResult<Insight<ClonedCampaign>> {
        request.validate()?;
        let span = tracing::info_span!("brand_voice", brand_id = %request.brand_id);
        async {
            let texts = if request.campaign_texts.is_empty() {
                match cancellable(cancel, self.engine.campaign_texts(&request.brand_id)).await {
                    Ok(texts) => texts,
                    Err(PulseError::DataUnavailable(reason)) => {
                        tracing::warn!(%reason, "no campaign history, using neutral voice");
                        Vec::new()
                    }
                    Err(err) => return Err(err),
                }
            } else {
                request.campaign_texts.clone()
            };

            let profile = voice::profile(&request.brand_id, &texts);
            tracing::debug!(
                sample_size = profile.sample_size,
                tone = profile.tone.as_str(),
                prior = profile.success_prior,
                "voice profiled"
            );
            let prompt = self.assembler.brand_voice(&profile)?;
            let outcome = self
                .orchestrator
                .run(&prompt, cancel, |text| validate_brand_voice(text, &profile))
                .await;
            Ok::<_, PulseError>(Insight {
                value: outcome.result?,
                trace: outcome.trace,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn smart_receipt(
        &self,
        request: &SmartReceiptRequest,
        cancel: &CancelToken,
    ) -> PulseResult<Insight<ReceiptRecommendation>> {
        request.validate()?;
        let span = tracing::info_span!(
            "smart_receipt",
            customer_id = %request.customer_id,
            basket = request.basket.len()
        );
        async {
            let window = request.window(self.now(), self.config.window_months)?;
            let plan = self.engine.plan(&request.customer_id, window)?;
            let summary =
                cancellable(cancel, self.engine.summarize_plan(plan, &request.customer_id)).await?;

            let prompt = self.assembler.receipt(&summary, &request.basket)?;
            let basket_len = request.basket.len();
            let outcome = self
                .orchestrator
                .run(&prompt, cancel, |text| {
                    validate_receipt(text, &request.customer_id, basket_len)
                })
                .await;
            Ok::<_, PulseError>(Insight {
                value: outcome.result?,
                trace: outcome.trace,
            })
        }
        .instrument(span)
        .await
    }

    /// Classify a free-form request, then run the matching operation.
    pub async fn process(&self, request: &Value, cancel: &CancelToken) -> PulseResult<Processed> {
        let explicit = request
            .as_object()
            .ok_or_else(|| PulseError::InvalidRequest("request must be a JSON object".into()))?;

        let (decision, triage_trace) = Triage::new(&self.assembler, &self.orchestrator)
            .classify(request, cancel)
            .await?;
        let params = normalize_params(decision.merged_params(explicit));

        let (result, trace) = match decision.kind {
            InsightKind::VibeReport => {
                let req: VibeReportRequest = parse_params(params)?;
                let out = self.vibe_report(&req, cancel).await?;
                (InsightResult::VibeProfile(out.value), out.trace)
            }
            InsightKind::BrandVoice => {
                let req = self.parse_brand_voice(params)?;
                let out = self.brand_voice(&req, cancel).await?;
                (InsightResult::ClonedCampaign(out.value), out.trace)
            }
            InsightKind::SmartReceipt => {
                let req: SmartReceiptRequest = parse_params(params)?;
                let out = self.smart_receipt(&req, cancel).await?;
                (InsightResult::ReceiptRecommendation(out.value), out.trace)
            }
        };

        Ok(Processed {
            decision,
            result,
            traces: vec![triage_trace, trace],
        })
    }

    /// Build a brand-voice request from loose JSON parameters. Campaign texts
    /// may arrive as bare strings; those count as sent, newest first in list
    /// order.
    pub fn parse_brand_voice(&self, mut params: Map<String, Value>) -> PulseResult<BrandVoiceRequest> {
        let brand_id = params
            .get("brand_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();
        let texts = match params.remove("campaign_texts") {
            Some(Value::Array(items)) => {
                let now = self.now();
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| match item {
                        Value::String(body) => Ok(CampaignText {
                            campaign_id: format!("supplied-{i}"),
                            brand_id: brand_id.clone(),
                            body,
                            outcome: Outcome::Sent,
                            sent_at: now - ChronoDuration::seconds(i as i64),
                        }),
                        other => serde_json::from_value::<CampaignText>(other)
                            .map_err(|e| PulseError::InvalidRequest(format!("campaign_texts[{i}]: {e}"))),
                    })
                    .collect::<PulseResult<Vec<_>>>()?
            }
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(PulseError::InvalidRequest(
                    "campaign_texts must be an array".into(),
                ))
            }
        };
        Ok(BrandVoiceRequest::new(brand_id).with_texts(texts))
    }
}

/// Map the aliases free-form callers use onto canonical request fields.
fn normalize_params(mut params: Map<String, Value>) -> Map<String, Value> {
    for (alias, canonical) in [
        ("user_id", "customer_id"),
        ("current_basket_items", "basket"),
        ("brand", "brand_id"),
    ] {
        if !params.contains_key(canonical) {
            if let Some(value) = params.remove(alias) {
                params.insert(canonical.to_string(), value);
            }
        }
    }
    // Source identifiers are often integers.
    for key in ["customer_id", "brand_id"] {
        if let Some(Value::Number(n)) = params.get(key) {
            let id = n.to_string();
            params.insert(key.to_string(), Value::String(id));
        }
    }
    params
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Map<String, Value>) -> PulseResult<T> {
    serde_json::from_value(Value::Object(params))
        .map_err(|e| PulseError::InvalidRequest(format!("extracted parameters are incomplete: {e}")))
}

async fn cancellable<T>(
    cancel: &CancelToken,
    work: impl Future<Output = PulseResult<T>>,
) -> PulseResult<T> {
    if cancel.is_cancelled() {
        return Err(PulseError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PulseError::Cancelled),
        result = work => result,
    }
}
