//! Voice profiles: the stylistic fingerprint of a brand's past campaigns.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub brand_id: String,
    /// Number of campaign texts the profile was built from (0..=10).
    pub sample_size: usize,
    pub tone: Tone,
    /// Emoji count over whitespace-token count across the sample.
    pub emoji_density: f64,
    pub cta_style: CtaStyle,
    /// Representative bodies, best-performing and most recent first.
    pub exemplars: Vec<String>,
    pub patterns: BodyPatterns,
    pub outcomes: OutcomeCounts,
    /// Outcome-weighted prior on the 0–100 scale.
    pub success_prior: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tone {
    Urgent,
    Playful,
    Casual,
    Formal,
    Neutral,
}

impl Tone {
    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Urgent => "urgent",
            Tone::Playful => "playful",
            Tone::Casual => "casual",
            Tone::Formal => "formal",
            Tone::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CtaStyle {
    Urgency,
    DiscountLed,
    Imperative,
    Soft,
}

impl CtaStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            CtaStyle::Urgency => "urgency",
            CtaStyle::DiscountLed => "discount-led",
            CtaStyle::Imperative => "imperative",
            CtaStyle::Soft => "soft",
        }
    }
}

/// Surface statistics over campaign bodies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyPatterns {
    pub avg_tokens: f64,
    /// Share of bodies containing `!`.
    pub exclamation_rate: f64,
    /// Share of bodies containing a `#hashtag`.
    pub hashtag_rate: f64,
    /// Share of bodies containing a discount code or percentage.
    pub offer_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub sent: u64,
    pub read: u64,
    pub unsent: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.sent + self.read + self.unsent
    }
}
