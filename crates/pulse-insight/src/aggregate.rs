//! Aggregation engine
//!
//! Evaluates a join plan exactly once and folds the rows into a
//! [`BehaviorSummary`]. The fold is a pure function of its input: every
//! ordering has an explicit tie-break, so the same rows always produce the
//! same bytes.

use crate::persona;
use crate::voice;
use chrono::{DateTime, Utc};
use pulse_model::{
    cents_to_units, BehaviorSummary, BehaviorWindow, CampaignText, CategoryStat, PulseResult, RfmMetrics,
    TransactionEvent, TransactionSample, VoiceProfile, SCHEMA_VERSION,
};
use pulse_model::request::MAX_CAMPAIGN_TEXTS;
use pulse_storage::{CampaignPlan, JoinPlan, JoinedRows, SourcePool};
use std::collections::BTreeMap;

pub const PALETTE_TAGS: usize = 3;

/// Builds summaries and voice profiles against the pooled source.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    pool: SourcePool,
    recent_limit: usize,
}

impl AggregationEngine {
    pub fn new(pool: SourcePool, recent_limit: usize) -> Self {
        Self { pool, recent_limit }
    }

    pub fn plan(&self, customer_id: &str, window: BehaviorWindow) -> PulseResult<JoinPlan> {
        Ok(JoinPlan::build(self.pool.schema(), &[customer_id.to_string()], window)?)
    }

    /// Evaluate `plan` and summarize it for `customer_id`.
    pub async fn summarize_plan(&self, plan: JoinPlan, customer_id: &str) -> PulseResult<BehaviorSummary> {
        let window = *plan.window();
        let rows = plan.execute(&self.pool).await?;
        Ok(summarize(customer_id, window, &rows, self.recent_limit))
    }

    pub async fn behavior_summary(
        &self,
        customer_id: &str,
        window: BehaviorWindow,
    ) -> PulseResult<BehaviorSummary> {
        let plan = self.plan(customer_id, window)?;
        self.summarize_plan(plan, customer_id).await
    }

    /// Latest campaign texts of a brand, newest first.
    pub async fn campaign_texts(&self, brand_id: &str) -> PulseResult<Vec<CampaignText>> {
        let plan = CampaignPlan::build(self.pool.schema(), brand_id, MAX_CAMPAIGN_TEXTS)?;
        Ok(plan.execute(&self.pool).await?.texts)
    }

    pub async fn voice_profile(&self, brand_id: &str) -> PulseResult<VoiceProfile> {
        let texts = self.campaign_texts(brand_id).await?;
        Ok(voice::profile(brand_id, &texts))
    }
}

// ============================================================================
// Summary fold
// ============================================================================

#[derive(Default)]
struct CategoryAcc {
    count: u64,
    spend_cents: i64,
    last: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct TagAcc {
    count: u64,
    last: Option<DateTime<Utc>>,
}

pub fn summarize(
    customer_id: &str,
    window: BehaviorWindow,
    rows: &JoinedRows,
    recent_limit: usize,
) -> BehaviorSummary {
    let events: Vec<&TransactionEvent> = rows
        .transactions
        .iter()
        .filter(|t| t.customer_id == customer_id && window.contains(t.occurred_at))
        .collect();
    let customer = rows.customers.get(customer_id).cloned();
    let excluded_records = rows.report.excluded_count() as u64;

    if events.is_empty() {
        return BehaviorSummary {
            schema_version: SCHEMA_VERSION,
            customer_id: customer_id.to_string(),
            window,
            customer,
            insufficient_data: true,
            transaction_count: 0,
            total_spend_cents: 0,
            total_discount_cents: 0,
            metrics: RfmMetrics::default(),
            categories: Vec::new(),
            palette: Vec::new(),
            persona: persona::NEWCOMER_PERSONA.to_string(),
            recent_transactions: Vec::new(),
            excluded_records,
        };
    }

    let mut total_spend_cents = 0i64;
    let mut total_discount_cents = 0i64;
    let mut last_purchase: Option<DateTime<Utc>> = None;
    let mut by_category: BTreeMap<&str, CategoryAcc> = BTreeMap::new();
    let mut by_tag: BTreeMap<&str, TagAcc> = BTreeMap::new();

    for event in &events {
        total_spend_cents = total_spend_cents.saturating_add(event.amount_cents);
        total_discount_cents = total_discount_cents.saturating_add(event.discount_cents);
        last_purchase = last_purchase.max(Some(event.occurred_at));

        let acc = by_category.entry(event.category.as_str()).or_default();
        acc.count += 1;
        acc.spend_cents = acc.spend_cents.saturating_add(event.amount_cents);
        acc.last = acc.last.max(Some(event.occurred_at));

        for tag in &event.tags {
            let acc = by_tag.entry(tag.as_str()).or_default();
            acc.count += 1;
            acc.last = acc.last.max(Some(event.occurred_at));
        }
    }

    let mut categories: Vec<CategoryStat> = by_category
        .into_iter()
        .filter_map(|(category, acc)| {
            Some(CategoryStat {
                category: category.to_string(),
                count: acc.count,
                spend_cents: acc.spend_cents,
                last_purchase_at: acc.last?,
            })
        })
        .collect();
    categories.sort_by(|a, b| {
        b.spend_cents
            .cmp(&a.spend_cents)
            .then(b.last_purchase_at.cmp(&a.last_purchase_at))
            .then(a.category.cmp(&b.category))
    });

    let mut tags: Vec<(&str, TagAcc)> = by_tag.into_iter().collect();
    tags.sort_by(|(a, x), (b, y)| {
        y.count
            .cmp(&x.count)
            .then(y.last.cmp(&x.last))
            .then(a.cmp(b))
    });
    let palette = tags
        .into_iter()
        .take(PALETTE_TAGS)
        .map(|(tag, _)| tag.to_string())
        .collect();

    let count = events.len() as u64;
    let monetary = cents_to_units(total_spend_cents);
    let discount_ratio = if total_spend_cents > 0 {
        (total_discount_cents as f64 / total_spend_cents as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let recency_days = last_purchase
        .map(|last| (window.end - last).num_days().max(0))
        .unwrap_or(0);
    let metrics = RfmMetrics {
        recency_days,
        frequency_per_month: count as f64 / f64::from(window.months.max(1)),
        monetary,
        avg_order_value: monetary / count as f64,
        discount_ratio,
        distinct_categories: categories.len() as u64,
    };

    let persona = persona::assign(&categories, total_spend_cents, discount_ratio).to_string();

    let recent_transactions = events
        .iter()
        .rev()
        .take(recent_limit)
        .map(|t| TransactionSample {
            occurred_at: t.occurred_at,
            category: t.category.clone(),
            amount: cents_to_units(t.amount_cents),
            quantity: t.quantity,
            tags: t.tags.clone(),
        })
        .collect();

    BehaviorSummary {
        schema_version: SCHEMA_VERSION,
        customer_id: customer_id.to_string(),
        window,
        customer,
        insufficient_data: false,
        transaction_count: count,
        total_spend_cents,
        total_discount_cents,
        metrics,
        categories,
        palette,
        persona,
        recent_transactions,
        excluded_records,
    }
}
