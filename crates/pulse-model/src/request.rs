//! Request objects accepted by the core operations.
//!
//! Each request is validated before any stage runs; an invalid request never
//! reaches the source or the model.

use crate::error::{PulseError, PulseResult};
use crate::record::CampaignText;
use crate::window::BehaviorWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Campaign texts beyond this many are ignored (oldest first).
pub const MAX_CAMPAIGN_TEXTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibeReportRequest {
    pub customer_id: String,
    #[serde(default)]
    pub window_months: Option<u32>,
    /// Window end; defaults to the request instant.
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl VibeReportRequest {
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            window_months: None,
            as_of: None,
        }
    }

    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn window_months(mut self, months: u32) -> Self {
        self.window_months = Some(months);
        self
    }

    pub fn validate(&self) -> PulseResult<()> {
        require_id("customer_id", &self.customer_id)
    }

    pub fn window(&self, now: DateTime<Utc>, default_months: u32) -> PulseResult<BehaviorWindow> {
        BehaviorWindow::trailing(
            self.as_of.unwrap_or(now),
            self.window_months.unwrap_or(default_months),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandVoiceRequest {
    pub brand_id: String,
    /// Past campaigns; when empty the latest ones are loaded from the source.
    #[serde(default)]
    pub campaign_texts: Vec<CampaignText>,
}

impl BrandVoiceRequest {
    pub fn new(brand_id: impl Into<String>) -> Self {
        Self {
            brand_id: brand_id.into(),
            campaign_texts: Vec::new(),
        }
    }

    pub fn with_texts(mut self, texts: Vec<CampaignText>) -> Self {
        self.campaign_texts = texts;
        self
    }

    pub fn validate(&self) -> PulseResult<()> {
        require_id("brand_id", &self.brand_id)?;
        if let Some(other) = self
            .campaign_texts
            .iter()
            .find(|t| t.brand_id != self.brand_id)
        {
            return Err(PulseError::InvalidRequest(format!(
                "campaign {} belongs to brand {:?}, not {:?}",
                other.campaign_id, other.brand_id, self.brand_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketItem {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(alias = "item_name")]
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub price: Option<f64>,
}

fn default_quantity() -> u32 {
    1
}

impl BasketItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            item_id: None,
            name: name.into(),
            quantity: 1,
            price: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartReceiptRequest {
    pub customer_id: String,
    #[serde(default, alias = "current_basket_items")]
    pub basket: Vec<BasketItem>,
    #[serde(default)]
    pub window_months: Option<u32>,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl SmartReceiptRequest {
    pub fn new(customer_id: impl Into<String>, basket: Vec<BasketItem>) -> Self {
        Self {
            customer_id: customer_id.into(),
            basket,
            window_months: None,
            as_of: None,
        }
    }

    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn validate(&self) -> PulseResult<()> {
        require_id("customer_id", &self.customer_id)?;
        if let Some(item) = self.basket.iter().find(|i| i.name.trim().is_empty()) {
            return Err(PulseError::InvalidRequest(format!(
                "basket item {:?} has no name",
                item.item_id.as_deref().unwrap_or("?")
            )));
        }
        if self.basket.iter().any(|i| i.quantity == 0) {
            return Err(PulseError::InvalidRequest(
                "basket item quantity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn window(&self, now: DateTime<Utc>, default_months: u32) -> PulseResult<BehaviorWindow> {
        BehaviorWindow::trailing(
            self.as_of.unwrap_or(now),
            self.window_months.unwrap_or(default_months),
        )
    }
}

fn require_id(field: &str, value: &str) -> PulseResult<()> {
    if value.trim().is_empty() {
        return Err(PulseError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}
