//! Prompt assembly
//!
//! Four fixed templates with named `{{slot}}` placeholders. Slot values are
//! always inserted as serialized JSON and the template is scanned once, so a
//! value can never open a new slot or escape its own. When the rendered text
//! exceeds the byte budget, array elements are dropped from the tail of the
//! lowest-priority fields first and every drop is recorded.

use crate::config::PromptLimits;
use pulse_model::{cents_to_units, BasketItem, BehaviorSummary, PulseError, VoiceProfile};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    VibeProfiler,
    BrandVoiceCloner,
    ReceiptRecommender,
    RequestClassifier,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateKind::VibeProfiler => "vibe_profiler",
            TemplateKind::BrandVoiceCloner => "brand_voice_cloner",
            TemplateKind::ReceiptRecommender => "receipt_recommender",
            TemplateKind::RequestClassifier => "request_classifier",
        }
    }

    fn template(self) -> (&'static str, &'static str) {
        match self {
            TemplateKind::VibeProfiler => (VIBE_SYSTEM, VIBE_USER),
            TemplateKind::BrandVoiceCloner => (VOICE_SYSTEM, VOICE_USER),
            TemplateKind::ReceiptRecommender => (RECEIPT_SYSTEM, RECEIPT_USER),
            TemplateKind::RequestClassifier => (TRIAGE_SYSTEM, TRIAGE_USER),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PromptError {
    #[error("template references unknown slot {0:?}")]
    MissingSlot(String),
    #[error("template has an unclosed slot")]
    Unclosed,
    /// The budget cannot hold the template and its fixed content.
    #[error("prompt needs {bytes} bytes after truncating every field, limit is {max}")]
    TooLarge { bytes: usize, max: usize },
    /// The prompt would fit without the caller-supplied slot.
    #[error("request field {slot:?} is too large: prompt needs {bytes} bytes, limit is {max}")]
    RequestTooLarge {
        slot: &'static str,
        bytes: usize,
        max: usize,
    },
}

impl From<PromptError> for PulseError {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::RequestTooLarge { .. } => PulseError::InvalidRequest(err.to_string()),
            _ => PulseError::Configuration(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Truncation {
    pub field: String,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedPrompt {
    pub kind: TemplateKind,
    pub system: String,
    pub user: String,
    /// Slot values exactly as rendered.
    pub input: Value,
    /// Hex SHA-256 of `system`, a blank line, then `user`.
    pub digest: String,
    pub truncations: Vec<Truncation>,
}

impl RenderedPrompt {
    pub fn byte_len(&self) -> usize {
        self.system.len() + self.user.len()
    }

    pub fn was_truncated(&self) -> bool {
        !self.truncations.is_empty()
    }
}

// ============================================================================
// Templates
// ============================================================================

const VIBE_SYSTEM: &str = "You are a retail analyst who writes loyalty \"vibe\" profiles. \
Ground every statement in the supplied data. Respond with a single JSON object and nothing else.";

const VIBE_USER: &str = r#"Customer behavior over the last {{window_months}} months.
insufficient_data: {{insufficient_data}}
customer: {{customer}}
metrics: {{metrics}}
categories (ranked by spend): {{categories}}
dominant tags: {{palette}}
persona from rule table: {{persona}}
recent transactions (newest first): {{recent_transactions}}

Return JSON with keys:
  "persona_label": string,
  "behavioral_metrics": object mapping metric name to number,
  "purchase_metrics": object mapping metric name to number,
  "color_palette": array of at least 3 hex color strings that fit the customer"#;

const VOICE_SYSTEM: &str = "You are a marketing copywriter who clones brand voices. \
Match tone, emoji density and call-to-action style exactly. Respond with a single JSON object and nothing else.";

const VOICE_USER: &str = r#"Brand: {{brand_id}}
voice profile: {{voice}}
past campaigns (best performing and newest first): {{exemplars}}

Write one new campaign in this voice.
Return JSON with keys:
  "generated_body": string,
  "predicted_success_score": integer from 0 to 100"#;

const RECEIPT_SYSTEM: &str = "You are a retail recommendation specialist. \
Suggest one item that complements the basket and fits the purchase history. Respond with a single JSON object and nothing else.";

const RECEIPT_USER: &str = r#"customer: {{customer}}
current basket: {{basket}}
purchase history: {{history}}

Return JSON with keys:
  "next_best_item": string,
  "loyalty_incentive_text": string,
  "coupon_code": string,
  "reasoning": string"#;

const TRIAGE_SYSTEM: &str = "You route retail analytics requests. \
Available operations: vibe_report (needs customer_id), brand_voice (needs brand_id, optional campaign_texts), \
smart_receipt (needs customer_id and basket). Respond with a single JSON object and nothing else.";

const TRIAGE_USER: &str = r#"request: {{request}}

Return JSON with keys:
  "agent_type": one of "vibe_report", "brand_voice", "smart_receipt",
  "extracted_params": object,
  "confidence": number from 0 to 1,
  "reasoning": string"#;

// ============================================================================
// Assembler
// ============================================================================

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    limits: PromptLimits,
}

impl PromptAssembler {
    pub fn new(limits: PromptLimits) -> Self {
        Self { limits }
    }

    pub fn vibe(&self, summary: &BehaviorSummary) -> Result<RenderedPrompt, PromptError> {
        let mut slots = BTreeMap::new();
        slots.insert("window_months", json!(summary.window.months));
        slots.insert("insufficient_data", json!(summary.insufficient_data));
        slots.insert("customer", customer_slot(summary));
        slots.insert("metrics", metrics_slot(summary));
        slots.insert("categories", categories_slot(summary));
        slots.insert("palette", json!(summary.palette));
        slots.insert("persona", json!(summary.persona));
        slots.insert("recent_transactions", self.recent_slot(summary));

        self.assemble(
            TemplateKind::VibeProfiler,
            slots,
            &[("recent_transactions", ""), ("categories", "")],
            &[],
        )
    }

    pub fn brand_voice(&self, profile: &VoiceProfile) -> Result<RenderedPrompt, PromptError> {
        let mut slots = BTreeMap::new();
        slots.insert("brand_id", json!(profile.brand_id));
        slots.insert(
            "voice",
            json!({
                "tone": profile.tone.as_str(),
                "emoji_density": round4(profile.emoji_density),
                "cta_style": profile.cta_style.as_str(),
                "patterns": profile.patterns,
                "outcomes": profile.outcomes,
                "success_prior": round4(profile.success_prior),
                "sample_size": profile.sample_size,
            }),
        );
        let exemplars: Vec<&String> = profile.exemplars.iter().take(self.limits.exemplars).collect();
        slots.insert("exemplars", json!(exemplars));

        self.assemble(
            TemplateKind::BrandVoiceCloner,
            slots,
            &[("exemplars", "")],
            &["brand_id"],
        )
    }

    pub fn receipt(
        &self,
        summary: &BehaviorSummary,
        basket: &[BasketItem],
    ) -> Result<RenderedPrompt, PromptError> {
        let mut slots = BTreeMap::new();
        slots.insert("customer", customer_slot(summary));
        slots.insert(
            "basket",
            Value::Array(
                basket
                    .iter()
                    .map(|item| {
                        json!({
                            "name": item.name,
                            "quantity": item.quantity,
                            "price": item.price,
                        })
                    })
                    .collect(),
            ),
        );
        slots.insert(
            "history",
            json!({
                "insufficient_data": summary.insufficient_data,
                "persona": summary.persona,
                "metrics": metrics_slot(summary),
                "categories": categories_slot(summary),
                "recent_transactions": self.recent_slot(summary),
            }),
        );

        self.assemble(
            TemplateKind::ReceiptRecommender,
            slots,
            &[
                ("history", "/recent_transactions"),
                ("history", "/categories"),
                ("basket", ""),
            ],
            &["basket"],
        )
    }

    pub fn triage(&self, request: &Value) -> Result<RenderedPrompt, PromptError> {
        let mut slots = BTreeMap::new();
        slots.insert("request", request.clone());
        self.assemble(TemplateKind::RequestClassifier, slots, &[], &["request"])
    }

    fn recent_slot(&self, summary: &BehaviorSummary) -> Value {
        json!(summary
            .recent_transactions
            .iter()
            .take(self.limits.recent_transactions)
            .collect::<Vec<_>>())
    }

    /// Render, then shrink `(slot, json-pointer)` arrays in priority order
    /// until the prompt fits. `request_slots` hold caller-supplied values; an
    /// overflow that disappears without them is the request's fault.
    fn assemble(
        &self,
        kind: TemplateKind,
        mut slots: BTreeMap<&'static str, Value>,
        shrink_order: &[(&'static str, &'static str)],
        request_slots: &[&'static str],
    ) -> Result<RenderedPrompt, PromptError> {
        let (system, user_template) = kind.template();
        let max = self.limits.max_input_bytes;
        let mut truncations: Vec<Truncation> = Vec::new();

        loop {
            let user = render(user_template, &slots)?;
            let bytes = system.len() + user.len();
            if bytes <= max {
                if !truncations.is_empty() {
                    tracing::debug!(template = kind.as_str(), bytes, ?truncations, "prompt truncated to fit");
                }
                let digest = digest(system, &user);
                let input = Value::Object(
                    slots
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v))
                        .collect(),
                );
                return Ok(RenderedPrompt {
                    kind,
                    system: system.to_string(),
                    user,
                    input,
                    digest,
                    truncations,
                });
            }

            let dropped = shrink_order.iter().find_map(|(slot, pointer)| {
                let array = slots.get_mut(slot)?.pointer_mut(pointer)?.as_array_mut()?;
                array.pop()?;
                Some(field_name(slot, pointer))
            });
            match dropped {
                Some(field) => match truncations.iter_mut().find(|t| t.field == field) {
                    Some(t) => t.dropped += 1,
                    None => truncations.push(Truncation { field, dropped: 1 }),
                },
                None => return Err(overflow(system, user_template, &slots, request_slots, bytes, max)),
            }
        }
    }
}

/// Blame the largest request slot whose removal lets the prompt fit, else
/// the budget.
fn overflow(
    system: &str,
    user_template: &str,
    slots: &BTreeMap<&'static str, Value>,
    request_slots: &[&'static str],
    bytes: usize,
    max: usize,
) -> PromptError {
    let mut stripped = slots.clone();
    for slot in request_slots {
        stripped.insert(*slot, Value::Null);
    }
    let fits_without_request = render(user_template, &stripped)
        .map(|user| system.len() + user.len() <= max)
        .unwrap_or(false);
    let culprit = request_slots
        .iter()
        .max_by_key(|slot| slots.get(*slot).map_or(0, |v| v.to_string().len()));
    match culprit {
        Some(slot) if fits_without_request => PromptError::RequestTooLarge {
            slot: *slot,
            bytes,
            max,
        },
        _ => PromptError::TooLarge { bytes, max },
    }
}

fn field_name(slot: &str, pointer: &str) -> String {
    if pointer.is_empty() {
        slot.to_string()
    } else {
        format!("{slot}{}", pointer.replace('/', "."))
    }
}

fn render(template: &str, slots: &BTreeMap<&'static str, Value>) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len() * 2);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or(PromptError::Unclosed)?;
        let name = after[..end].trim();
        let value = slots
            .get(name)
            .ok_or_else(|| PromptError::MissingSlot(name.to_string()))?;
        out.push_str(&value.to_string());
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn digest(system: &str, user: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(system.as_bytes());
    hasher.update(b"\n\n");
    hasher.update(user.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn customer_slot(summary: &BehaviorSummary) -> Value {
    match &summary.customer {
        Some(c) => json!({
            "customer_id": c.customer_id,
            "first_name": c.first_name,
            "city": c.city,
            "loyalty_member": c.loyalty_member,
            "member_since": c.created_at.map(|t| t.date_naive().to_string()),
        }),
        None => json!({ "customer_id": summary.customer_id }),
    }
}

fn metrics_slot(summary: &BehaviorSummary) -> Value {
    let m = &summary.metrics;
    json!({
        "transactions": summary.transaction_count,
        "total_spend": cents_to_units(summary.total_spend_cents),
        "recency_days": m.recency_days,
        "frequency_per_month": round4(m.frequency_per_month),
        "avg_order_value": round4(m.avg_order_value),
        "discount_ratio": round4(m.discount_ratio),
        "distinct_categories": m.distinct_categories,
    })
}

fn categories_slot(summary: &BehaviorSummary) -> Value {
    Value::Array(
        summary
            .categories
            .iter()
            .map(|c| {
                json!({
                    "category": c.category,
                    "count": c.count,
                    "spend": cents_to_units(c.spend_cents),
                })
            })
            .collect(),
    )
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pulse_model::{BehaviorWindow, ErrorCode, TransactionEvent};
    use pulse_storage::JoinedRows;

    #[test]
    fn test_render_escapes_values() {
        let mut slots = BTreeMap::new();
        slots.insert("a", json!("{{b}} \"quoted\"\nline"));
        slots.insert("b", json!(1));
        let out = render("x={{a}} y={{ b }}", &slots).unwrap();
        assert_eq!(out, r#"x="{{b}} \"quoted\"\nline" y=1"#);
    }

    #[test]
    fn test_render_rejects_unknown_and_unclosed() {
        let slots = BTreeMap::new();
        assert_eq!(
            render("{{nope}}", &slots).unwrap_err(),
            PromptError::MissingSlot("nope".into())
        );
        assert_eq!(render("{{open", &slots).unwrap_err(), PromptError::Unclosed);
    }

    #[test]
    fn test_triage_too_large_is_configuration_error() {
        let assembler = PromptAssembler::new(PromptLimits {
            max_input_bytes: 64,
            ..PromptLimits::default()
        });
        let err = assembler.triage(&json!({"query": "x"})).unwrap_err();
        assert!(matches!(err, PromptError::TooLarge { .. }));
        assert!(PulseError::from(err).is_fatal());
    }

    #[test]
    fn test_oversized_query_is_invalid_request() {
        let assembler = PromptAssembler::new(PromptLimits::default());
        let err = assembler
            .triage(&json!({ "query": "a".repeat(20_000) }))
            .unwrap_err();
        assert!(matches!(err, PromptError::RequestTooLarge { slot: "request", .. }));

        let err = PulseError::from(err);
        assert!(!err.is_fatal());
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_oversized_brand_id_is_invalid_request() {
        let assembler = PromptAssembler::new(PromptLimits::default());
        let profile = crate::voice::profile(&"b".repeat(20_000), &[]);
        let err = assembler.brand_voice(&profile).unwrap_err();
        assert!(matches!(err, PromptError::RequestTooLarge { slot: "brand_id", .. }));
        assert_eq!(PulseError::from(err).code(), ErrorCode::InvalidRequest);
    }

    fn june(day: u32, category: &str) -> TransactionEvent {
        TransactionEvent {
            transaction_id: Some(format!("t{day}")),
            customer_id: "c1".into(),
            occurred_at: Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).unwrap(),
            category: category.into(),
            amount_cents: 1_000 * day as i64,
            quantity: 1,
            discount_cents: 0,
            tags: Vec::new(),
        }
    }

    fn five_purchases() -> BehaviorSummary {
        let window =
            BehaviorWindow::trailing(Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(), 12).unwrap();
        let rows = JoinedRows {
            transactions: vec![
                june(1, "books"),
                june(2, "coffee"),
                june(3, "garden"),
                june(4, "books"),
                june(5, "coffee"),
            ],
            ..JoinedRows::default()
        };
        crate::aggregate::summarize("c1", window, &rows, 20)
    }

    fn untruncated_vibe(summary: &BehaviorSummary) -> RenderedPrompt {
        let prompt = PromptAssembler::new(PromptLimits {
            max_input_bytes: usize::MAX,
            ..PromptLimits::default()
        })
        .vibe(summary)
        .unwrap();
        assert!(!prompt.was_truncated());
        prompt
    }

    fn elements(prompt: &RenderedPrompt, slot: &str) -> Vec<Value> {
        prompt.input[slot].as_array().cloned().unwrap_or_default()
    }

    /// Bytes saved by removing the last `k` elements of a compact JSON array
    /// that keeps at least one element.
    fn tail_bytes(items: &[Value], k: usize) -> usize {
        items[items.len() - k..]
            .iter()
            .map(|v| v.to_string().len() + 1)
            .sum()
    }

    #[test]
    fn test_truncation_drops_oldest_transactions_first() {
        let summary = five_purchases();
        let full = untruncated_vibe(&summary);
        let recent = elements(&full, "recent_transactions");
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0]["occurred_at"], "2025-06-05T12:00:00Z");

        let k = 2;
        let assembler = PromptAssembler::new(PromptLimits {
            max_input_bytes: full.byte_len() - tail_bytes(&recent, k),
            ..PromptLimits::default()
        });
        let prompt = assembler.vibe(&summary).unwrap();

        assert!(prompt.was_truncated());
        assert_eq!(
            prompt.truncations,
            vec![Truncation {
                field: "recent_transactions".into(),
                dropped: k,
            }]
        );
        assert_eq!(elements(&prompt, "recent_transactions"), &recent[..recent.len() - k]);
        assert_eq!(elements(&prompt, "categories"), elements(&full, "categories"));
        assert!(prompt.byte_len() <= assembler.limits.max_input_bytes);
    }

    #[test]
    fn test_categories_shrink_only_after_transactions_are_gone() {
        let summary = five_purchases();
        let full = untruncated_vibe(&summary);
        let recent = elements(&full, "recent_transactions");
        let categories = elements(&full, "categories");
        assert_eq!(categories.len(), 3);

        // Emptying the array keeps its brackets and loses one comma fewer.
        let all_recent = tail_bytes(&recent, recent.len()) - 1;
        let assembler = PromptAssembler::new(PromptLimits {
            max_input_bytes: full.byte_len() - all_recent - tail_bytes(&categories, 1),
            ..PromptLimits::default()
        });
        let prompt = assembler.vibe(&summary).unwrap();

        assert_eq!(
            prompt.truncations,
            vec![
                Truncation {
                    field: "recent_transactions".into(),
                    dropped: recent.len(),
                },
                Truncation {
                    field: "categories".into(),
                    dropped: 1,
                },
            ]
        );
        assert!(elements(&prompt, "recent_transactions").is_empty());
        assert_eq!(elements(&prompt, "categories"), &categories[..2]);
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(digest("a", "b"), digest("a", "b"));
        assert_ne!(digest("a", "b"), digest("a", "c"));
        assert_eq!(digest("a", "b").len(), 64);
    }
}
