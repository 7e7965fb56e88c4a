//! Optic Pulse data model
//!
//! Shared types for the behavioral summarization pipeline:
//!
//! ```text
//!   source rows ──► canonical records ──► derived aggregates ──► insight results
//!                   (record)              (summary, voice)       (insight)
//! ```
//!
//! - [`record`]: canonical, versioned shapes produced by the schema normalizer
//! - [`window`]: the bounded behavior window aggregates are computed over
//! - [`summary`] / [`voice`]: read-only, request-scoped aggregates
//! - [`insight`]: the validated outputs of the three generative operations
//! - [`request`]: validated request objects accepted by the core operations
//! - [`error`]: the error taxonomy with stable codes

pub mod error;
pub mod insight;
pub mod record;
pub mod request;
pub mod summary;
pub mod voice;
pub mod window;

pub use error::{ErrorCode, ErrorReport, PulseError, PulseResult};
pub use insight::{ClonedCampaign, InsightKind, InsightResult, ReceiptRecommendation, VibeProfile};
pub use record::{CampaignText, CustomerRecord, Outcome, TransactionEvent};
pub use request::{BasketItem, BrandVoiceRequest, SmartReceiptRequest, VibeReportRequest};
pub use summary::{BehaviorSummary, CategoryStat, RfmMetrics, TransactionSample};
pub use voice::{BodyPatterns, CtaStyle, OutcomeCounts, Tone, VoiceProfile};
pub use window::BehaviorWindow;

/// Version of the canonical field set. Bumped whenever a canonical record
/// gains, loses or re-types a field.
pub const SCHEMA_VERSION: u32 = 1;

/// Convert integer minor units (cents) to major units for display and prompts.
pub fn cents_to_units(cents: i64) -> f64 {
    cents as f64 / 100.0
}
