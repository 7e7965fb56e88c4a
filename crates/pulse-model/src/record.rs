//! Canonical records produced by the schema normalizer.
//!
//! These are immutable snapshots: the pipeline reads them, never mutates them,
//! and never writes them back to the source of truth.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Customer metadata, one snapshot per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub city: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub loyalty_member: bool,
    /// Lifetime value in cents, when the source tracks it.
    pub lifetime_value_cents: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A single purchase line. Append-only.
///
/// `customer_id` is a reference by value; the event never owns the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub transaction_id: Option<String>,
    pub customer_id: String,
    pub occurred_at: DateTime<Utc>,
    pub category: String,
    /// Gross line amount in cents (unit price × quantity).
    pub amount_cents: i64,
    pub quantity: u32,
    /// Discount applied to the line, in cents.
    pub discount_cents: i64,
    /// Color / attribute tags, lower-cased and de-duplicated.
    pub tags: Vec<String>,
}

/// Delivery outcome of a campaign message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Sent,
    Read,
    Unsent,
}

impl Outcome {
    /// Outcome weight in half-points (`read`=2, `sent`=1, `unsent`=0).
    ///
    /// Integer weights keep the success prior exact for every sample size.
    pub fn half_points(self) -> u64 {
        match self {
            Outcome::Read => 2,
            Outcome::Sent => 1,
            Outcome::Unsent => 0,
        }
    }

    /// Outcome weight on the 0.0–1.0 scale.
    pub fn weight(self) -> f64 {
        self.half_points() as f64 / 2.0
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Sent => "sent",
            Outcome::Read => "read",
            Outcome::Unsent => "unsent",
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sent" | "delivered" => Ok(Outcome::Sent),
            "read" | "opened" => Ok(Outcome::Read),
            "unsent" | "failed" | "bounced" => Ok(Outcome::Unsent),
            other => Err(format!("unknown delivery outcome {other:?}")),
        }
    }
}

/// Body text of a past campaign plus its delivery outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignText {
    pub campaign_id: String,
    pub brand_id: String,
    pub body: String,
    pub outcome: Outcome,
    pub sent_at: DateTime<Utc>,
}
