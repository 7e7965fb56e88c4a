//! Behavior window: the bounded time range aggregates are computed over.

use crate::error::{PulseError, PulseResult};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// Half-open interval `[start, end)` ending at the query instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub months: u32,
}

impl BehaviorWindow {
    pub const DEFAULT_MONTHS: u32 = 12;
    pub const MAX_MONTHS: u32 = 120;

    /// The `months` calendar months ending at `end`.
    pub fn trailing(end: DateTime<Utc>, months: u32) -> PulseResult<Self> {
        if months == 0 || months > Self::MAX_MONTHS {
            return Err(PulseError::InvalidRequest(format!(
                "window must span 1..={} months, got {months}",
                Self::MAX_MONTHS
            )));
        }
        let start = end
            .checked_sub_months(Months::new(months))
            .ok_or_else(|| PulseError::InvalidRequest(format!("window of {months} months underflows")))?;
        Ok(Self { start, end, months })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}
