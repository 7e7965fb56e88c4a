//! Request triage: classify a free-form request into one of the three
//! operations and pull out its parameters.

use crate::cancel::CancelToken;
use crate::orchestrator::{CallTrace, Orchestrator};
use crate::prompt::PromptAssembler;
use crate::validate::validate_triage;
use pulse_model::{InsightKind, PulseResult};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageDecision {
    pub kind: InsightKind,
    pub params: Map<String, Value>,
    /// Clamped to 0.0..=1.0.
    pub confidence: f64,
    pub reasoning: String,
}

impl TriageDecision {
    /// Overlay explicitly supplied parameters on the model-extracted ones.
    pub fn merged_params(&self, explicit: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = self.params.clone();
        for (key, value) in explicit {
            if !value.is_null() {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

pub struct Triage<'a> {
    assembler: &'a PromptAssembler,
    orchestrator: &'a Orchestrator,
}

impl<'a> Triage<'a> {
    pub fn new(assembler: &'a PromptAssembler, orchestrator: &'a Orchestrator) -> Self {
        Self {
            assembler,
            orchestrator,
        }
    }

    pub async fn classify(
        &self,
        request: &Value,
        cancel: &CancelToken,
    ) -> PulseResult<(TriageDecision, CallTrace)> {
        let prompt = self.assembler.triage(request)?;
        let outcome = self.orchestrator.run(&prompt, cancel, validate_triage).await;
        let decision = outcome.result?;
        tracing::info!(
            kind = decision.kind.as_str(),
            confidence = decision.confidence,
            "request classified"
        );
        Ok((decision, outcome.trace))
    }
}
