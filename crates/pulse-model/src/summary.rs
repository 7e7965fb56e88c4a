//! Behavior summaries: per-customer aggregates over a bounded window.

use crate::record::CustomerRecord;
use crate::window::BehaviorWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived, read-only aggregate for one customer.
///
/// Recomputed on every request and never persisted. Serializing two summaries
/// built from the same window and source yields identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorSummary {
    pub schema_version: u32,
    pub customer_id: String,
    pub window: BehaviorWindow,
    pub customer: Option<CustomerRecord>,
    /// True when the window holds no transactions. Metrics are then all zero.
    pub insufficient_data: bool,
    pub transaction_count: u64,
    pub total_spend_cents: i64,
    pub total_discount_cents: i64,
    pub metrics: RfmMetrics,
    /// Ranked by spend descending, then most recent purchase, then name.
    pub categories: Vec<CategoryStat>,
    /// Top color / attribute tags by frequency (at most three).
    pub palette: Vec<String>,
    pub persona: String,
    /// Most recent transactions first; the prompt assembler trims from the end.
    pub recent_transactions: Vec<TransactionSample>,
    /// Source rows dropped by the normalizer while building this summary.
    pub excluded_records: u64,
}

/// Recency / frequency / monetary metrics plus a few derived ratios.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RfmMetrics {
    /// Whole days between the last purchase and the window end.
    pub recency_days: i64,
    /// Transactions per month of the window.
    pub frequency_per_month: f64,
    /// Total spend in major units.
    pub monetary: f64,
    pub avg_order_value: f64,
    /// Discount as a share of gross spend (0.0–1.0).
    pub discount_ratio: f64,
    pub distinct_categories: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStat {
    pub category: String,
    pub count: u64,
    pub spend_cents: i64,
    pub last_purchase_at: DateTime<Utc>,
}

/// Compact transaction view included in prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSample {
    pub occurred_at: DateTime<Utc>,
    pub category: String,
    pub amount: f64,
    pub quantity: u32,
    pub tags: Vec<String>,
}

impl BehaviorSummary {
    /// Spend share of the top-ranked category, 0.0 with no data.
    pub fn top_category_share(&self) -> f64 {
        match (self.categories.first(), self.total_spend_cents) {
            (Some(top), total) if total > 0 => top.spend_cents as f64 / total as f64,
            _ => 0.0,
        }
    }
}
