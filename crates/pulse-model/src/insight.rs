//! Insight results: the validated outputs of the three generative operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    VibeReport,
    BrandVoice,
    SmartReceipt,
}

impl InsightKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightKind::VibeReport => "vibe_report",
            InsightKind::BrandVoice => "brand_voice",
            InsightKind::SmartReceipt => "smart_receipt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "vibe_report" | "vibe" => Some(InsightKind::VibeReport),
            "brand_voice" | "brand_voice_clone" => Some(InsightKind::BrandVoice),
            "smart_receipt" | "receipt" => Some(InsightKind::SmartReceipt),
            _ => None,
        }
    }
}

/// Loyalty "vibe" profile for one customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibeProfile {
    pub customer_id: String,
    pub persona_label: String,
    pub behavioral_metrics: BTreeMap<String, f64>,
    pub purchase_metrics: BTreeMap<String, f64>,
    /// Exactly three entries.
    pub color_palette: Vec<String>,
    pub insufficient_data: bool,
    pub vibe_card_path: Option<String>,
}

/// A new campaign body written in a brand's cloned voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClonedCampaign {
    pub brand_id: String,
    pub tone: String,
    pub emoji_density: f64,
    pub cta_style: String,
    pub generated_body: String,
    /// 0–100.
    pub predicted_success_score: u8,
    pub success_prior: f64,
    pub campaigns_analyzed: usize,
}

/// Next-best-item suggestion printed on a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecommendation {
    pub customer_id: String,
    pub next_best_item: String,
    pub loyalty_incentive_text: String,
    pub coupon_code: String,
    pub reasoning: Option<String>,
    pub basket_items_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsightResult {
    VibeProfile(VibeProfile),
    ClonedCampaign(ClonedCampaign),
    ReceiptRecommendation(ReceiptRecommendation),
}

impl InsightResult {
    pub fn kind(&self) -> InsightKind {
        match self {
            InsightResult::VibeProfile(_) => InsightKind::VibeReport,
            InsightResult::ClonedCampaign(_) => InsightKind::BrandVoice,
            InsightResult::ReceiptRecommendation(_) => InsightKind::SmartReceipt,
        }
    }
}
