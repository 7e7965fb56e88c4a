//! Insight validation
//!
//! Turns raw model text into a typed result or a [`ValidationError`]. The
//! validator repairs what can be repaired without inventing content (clamping
//! scores, trimming strings, truncating the palette, pulling a coupon out of a
//! `coupons` array) and rejects everything structural. A caller never sees a
//! partially filled result.

use crate::persona::FALLBACK_PERSONA;
use crate::triage::TriageDecision;
use pulse_model::{
    cents_to_units, BehaviorSummary, ClonedCampaign, InsightKind, PulseError, ReceiptRecommendation,
    VibeProfile, VoiceProfile,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub const PALETTE_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("response contains no JSON object")]
    NoJson,
    #[error("response JSON is malformed: {0}")]
    Malformed(String),
    #[error("response JSON is not an object")]
    NotObject,
    #[error("required field `{0}` is missing")]
    Missing(&'static str),
    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("required field `{0}` is empty")]
    Empty(&'static str),
}

impl From<ValidationError> for PulseError {
    fn from(err: ValidationError) -> Self {
        PulseError::Validation(err.to_string())
    }
}

// ============================================================================
// JSON extraction
// ============================================================================

/// Parse bare JSON, or the first balanced `{...}` inside fences or prose.
pub fn extract_object(text: &str) -> Result<Map<String, Value>, ValidationError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return match value {
            Value::Object(map) => Ok(map),
            _ => Err(ValidationError::NotObject),
        };
    }

    let start = trimmed.find('{').ok_or(ValidationError::NoJson)?;
    let candidate = balanced_object(&trimmed[start..])
        .ok_or_else(|| ValidationError::Malformed("unbalanced braces".to_string()))?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ValidationError::NotObject),
        Err(e) => Err(ValidationError::Malformed(e.to_string())),
    }
}

/// The prefix of `text` (which starts with `{`) that closes the first brace,
/// skipping braces inside string literals.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ============================================================================
// Field access
// ============================================================================

struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
    /// First present, non-null value among `names`.
    fn get(&self, names: &[&str]) -> Option<&'a Value> {
        names
            .iter()
            .find_map(|name| self.0.get(*name).filter(|v| !v.is_null()))
    }

    fn required_str(&self, field: &'static str, aliases: &[&str]) -> Result<String, ValidationError> {
        let value = self
            .get(&with_aliases(field, aliases))
            .ok_or(ValidationError::Missing(field))?;
        non_empty_str(field, value)
    }

    fn optional_str(&self, names: &[&str]) -> Option<String> {
        self.get(names)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn required_number(&self, field: &'static str, aliases: &[&str]) -> Result<f64, ValidationError> {
        let value = self
            .get(&with_aliases(field, aliases))
            .ok_or(ValidationError::Missing(field))?;
        as_number(value).ok_or(ValidationError::WrongType {
            field,
            expected: "a number",
        })
    }

    fn required_object(
        &self,
        field: &'static str,
        aliases: &[&str],
    ) -> Result<&'a Map<String, Value>, ValidationError> {
        self.get(&with_aliases(field, aliases))
            .ok_or(ValidationError::Missing(field))?
            .as_object()
            .ok_or(ValidationError::WrongType {
                field,
                expected: "an object",
            })
    }
}

fn with_aliases<'n>(field: &'n str, aliases: &[&'n str]) -> Vec<&'n str> {
    let mut names = vec![field];
    names.extend_from_slice(aliases);
    names
}

fn non_empty_str(field: &'static str, value: &Value) -> Result<String, ValidationError> {
    let s = value.as_str().ok_or(ValidationError::WrongType {
        field,
        expected: "a string",
    })?;
    let s = s.trim();
    if s.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    Ok(s.to_string())
}

/// Numbers, or strings holding a number (models occasionally quote them).
fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn numeric_map(map: &Map<String, Value>) -> BTreeMap<String, f64> {
    map.iter()
        .filter_map(|(k, v)| as_number(v).map(|n| (k.trim().to_string(), n)))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

// ============================================================================
// Per-kind validators
// ============================================================================

pub fn validate_vibe(text: &str, summary: &BehaviorSummary) -> Result<VibeProfile, ValidationError> {
    let object = extract_object(text)?;
    let fields = Fields(&object);

    let model_persona = fields.required_str("persona_label", &["shopping_persona", "persona"])?;
    let mut behavioral = numeric_map(fields.required_object("behavioral_metrics", &[])?);
    let mut purchase = numeric_map(fields.required_object("purchase_metrics", &[])?);
    let palette_value = fields
        .get(&["color_palette", "color_palette_hints", "palette"])
        .ok_or(ValidationError::Missing("color_palette"))?;
    let model_palette = palette_value.as_array().ok_or(ValidationError::WrongType {
        field: "color_palette",
        expected: "an array of strings",
    })?;

    let mut palette: Vec<String> = Vec::with_capacity(PALETTE_SIZE);
    let candidates = summary
        .palette
        .iter()
        .cloned()
        .chain(model_palette.iter().filter_map(|v| v.as_str()).map(str::to_string));
    for color in candidates {
        let color = color.trim().to_string();
        if color.is_empty() || palette.iter().any(|c| c.eq_ignore_ascii_case(&color)) {
            continue;
        }
        palette.push(color);
        if palette.len() == PALETTE_SIZE {
            break;
        }
    }
    if palette.len() < PALETTE_SIZE {
        return Err(ValidationError::WrongType {
            field: "color_palette",
            expected: "an array of at least 3 distinct colors",
        });
    }

    // Computed metrics are authoritative over model-restated ones.
    let m = &summary.metrics;
    behavioral.insert("recency_days".into(), m.recency_days as f64);
    behavioral.insert("frequency_per_month".into(), m.frequency_per_month);
    behavioral.insert("discount_ratio".into(), m.discount_ratio);
    behavioral.insert("distinct_categories".into(), m.distinct_categories as f64);
    purchase.insert("transaction_count".into(), summary.transaction_count as f64);
    purchase.insert("total_spend".into(), cents_to_units(summary.total_spend_cents));
    purchase.insert("avg_order_value".into(), m.avg_order_value);

    let persona_label = if summary.persona == FALLBACK_PERSONA {
        model_persona
    } else {
        summary.persona.clone()
    };

    Ok(VibeProfile {
        customer_id: summary.customer_id.clone(),
        persona_label,
        behavioral_metrics: behavioral,
        purchase_metrics: purchase,
        color_palette: palette,
        insufficient_data: summary.insufficient_data,
        vibe_card_path: None,
    })
}

pub fn validate_brand_voice(text: &str, profile: &VoiceProfile) -> Result<ClonedCampaign, ValidationError> {
    let object = extract_object(text)?;
    let fields = Fields(&object);

    let generated_body = fields.required_str("generated_body", &["new_campaign_body", "body"])?;
    let score = fields.required_number("predicted_success_score", &["success_score", "score"])?;

    Ok(ClonedCampaign {
        brand_id: profile.brand_id.clone(),
        tone: profile.tone.as_str().to_string(),
        emoji_density: profile.emoji_density,
        cta_style: profile.cta_style.as_str().to_string(),
        generated_body,
        predicted_success_score: clamp_score(score),
        success_prior: profile.success_prior,
        campaigns_analyzed: profile.sample_size,
    })
}

/// Clamp to 0..=100 and round to the nearest integer.
pub fn clamp_score(score: f64) -> u8 {
    score.round().clamp(0.0, 100.0) as u8
}

pub fn validate_receipt(
    text: &str,
    customer_id: &str,
    basket_items_count: usize,
) -> Result<ReceiptRecommendation, ValidationError> {
    let object = extract_object(text)?;
    let fields = Fields(&object);

    let next_best_item = match fields.get(&["next_best_item", "recommended_item"]) {
        None => return Err(ValidationError::Missing("next_best_item")),
        Some(Value::Object(item)) => {
            let item = Fields(item);
            item.required_str("name", &["item_name", "product", "title"])
                .map_err(|_| ValidationError::WrongType {
                    field: "next_best_item",
                    expected: "a string or an object with a name",
                })?
        }
        Some(value) => non_empty_str("next_best_item", value)?,
    };
    let loyalty_incentive_text = fields.required_str("loyalty_incentive_text", &["loyalty_incentive"])?;
    let coupon_code = match fields.get(&["coupon_code"]) {
        Some(value) => non_empty_str("coupon_code", value)?,
        None => first_coupon(&fields)?,
    };

    Ok(ReceiptRecommendation {
        customer_id: customer_id.to_string(),
        next_best_item,
        loyalty_incentive_text,
        coupon_code,
        reasoning: fields.optional_str(&["reasoning", "recommendation_reasoning"]),
        basket_items_count,
    })
}

fn first_coupon(fields: &Fields<'_>) -> Result<String, ValidationError> {
    let first = fields
        .get(&["coupons"])
        .and_then(Value::as_array)
        .and_then(|coupons| coupons.first())
        .ok_or(ValidationError::Missing("coupon_code"))?;
    match first {
        Value::Object(coupon) => Fields(coupon).required_str("code", &["coupon_code"]).map_err(|_| {
            ValidationError::WrongType {
                field: "coupon_code",
                expected: "a string or a coupon object with a code",
            }
        }),
        value => non_empty_str("coupon_code", value),
    }
}

pub fn validate_triage(text: &str) -> Result<TriageDecision, ValidationError> {
    let object = extract_object(text)?;
    let fields = Fields(&object);

    let agent = fields.required_str("agent_type", &["operation"])?;
    let kind = InsightKind::parse(&agent).ok_or(ValidationError::WrongType {
        field: "agent_type",
        expected: "one of vibe_report, brand_voice, smart_receipt",
    })?;
    let params = fields.required_object("extracted_params", &["params"])?.clone();
    let confidence = fields.required_number("confidence", &[])?.clamp(0.0, 1.0);

    Ok(TriageDecision {
        kind,
        params,
        confidence,
        reasoning: fields.optional_str(&["reasoning"]).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_model::{BodyPatterns, CtaStyle, OutcomeCounts, Tone};

    fn profile() -> VoiceProfile {
        VoiceProfile {
            brand_id: "glow".into(),
            sample_size: 2,
            tone: Tone::Playful,
            emoji_density: 0.1,
            cta_style: CtaStyle::Imperative,
            exemplars: vec![],
            patterns: BodyPatterns::default(),
            outcomes: OutcomeCounts::default(),
            success_prior: 75.0,
        }
    }

    #[test]
    fn test_extract_from_fence_and_prose() {
        let text = "Sure! Here it is:\n```json\n{\"a\": \"}{\", \"b\": {\"c\": 1}}\n```\nThanks";
        let object = extract_object(text).unwrap();
        assert_eq!(object["a"], "}{");
        assert_eq!(object["b"]["c"], 1);
    }

    #[test]
    fn test_extract_rejects_non_objects() {
        assert_eq!(extract_object("[1, 2]"), Err(ValidationError::NotObject));
        assert_eq!(extract_object("no json here"), Err(ValidationError::NoJson));
        assert!(matches!(
            extract_object("prefix {\"a\": 1"),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_brand_voice_score_clamped_and_rounded() {
        let out = validate_brand_voice(
            r#"{"generated_body": "  Glow up! ✨ ", "predicted_success_score": 150}"#,
            &profile(),
        )
        .unwrap();
        assert_eq!(out.predicted_success_score, 100);
        assert_eq!(out.generated_body, "Glow up! ✨");
        assert_eq!(out.tone, "playful");

        let out = validate_brand_voice(
            r#"{"new_campaign_body": "x", "predicted_success_score": "72.6"}"#,
            &profile(),
        )
        .unwrap();
        assert_eq!(out.predicted_success_score, 73);

        let out = validate_brand_voice(
            r#"{"generated_body": "x", "predicted_success_score": -4}"#,
            &profile(),
        )
        .unwrap();
        assert_eq!(out.predicted_success_score, 0);
    }

    #[test]
    fn test_brand_voice_missing_score() {
        assert_eq!(
            validate_brand_voice(r#"{"generated_body": "x"}"#, &profile()),
            Err(ValidationError::Missing("predicted_success_score"))
        );
        assert_eq!(
            validate_brand_voice(r#"{"generated_body": "  ", "predicted_success_score": 1}"#, &profile()),
            Err(ValidationError::Empty("generated_body"))
        );
    }

    #[test]
    fn test_receipt_coupon_from_array() {
        let out = validate_receipt(
            r#"{"next_best_item": {"item_name": "Oat Milk"}, "loyalty_incentive_text": "Double points",
                "coupons": [{"code": "OAT10"}, {"code": "OAT20"}], "recommendation_reasoning": "pairs with cereal"}"#,
            "c1",
            2,
        )
        .unwrap();
        assert_eq!(out.next_best_item, "Oat Milk");
        assert_eq!(out.coupon_code, "OAT10");
        assert_eq!(out.reasoning.as_deref(), Some("pairs with cereal"));
        assert_eq!(out.basket_items_count, 2);
    }

    #[test]
    fn test_receipt_requires_coupon() {
        assert_eq!(
            validate_receipt(
                r#"{"next_best_item": "Oat Milk", "loyalty_incentive_text": "Double points"}"#,
                "c1",
                1
            ),
            Err(ValidationError::Missing("coupon_code"))
        );
        assert!(matches!(
            validate_receipt(
                r#"{"next_best_item": 7, "loyalty_incentive_text": "x", "coupon_code": "A"}"#,
                "c1",
                1
            ),
            Err(ValidationError::WrongType { field: "next_best_item", .. })
        ));
    }

    #[test]
    fn test_triage_confidence_clamped() {
        let decision = validate_triage(
            r#"{"agent_type": "brand-voice", "extracted_params": {"brand_id": "glow"}, "confidence": 1.7}"#,
        )
        .unwrap();
        assert_eq!(decision.kind, InsightKind::BrandVoice);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.params["brand_id"], "glow");

        assert!(validate_triage(r#"{"agent_type": "weather", "extracted_params": {}, "confidence": 1}"#).is_err());
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(99.5), 100);
        assert_eq!(clamp_score(49.4), 49);
        assert_eq!(clamp_score(1e9), 100);
    }
}
