//! Splitting a long recording into per-post clips

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{PREMIUM_DURATION_LIMIT, STANDARD_DURATION_LIMIT};

/// Account classification that decides the per-post duration ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountTier {
    #[default]
    Standard,
    Premium,
}

impl AccountTier {
    pub fn duration_ceiling(&self) -> Duration {
        match self {
            AccountTier::Standard => STANDARD_DURATION_LIMIT,
            AccountTier::Premium => PREMIUM_DURATION_LIMIT,
        }
    }

    /// Blue and business verification unlock long-form video.
    pub fn from_verified_type(verified_type: Option<&str>) -> Self {
        match verified_type {
            Some("blue") | Some("business") => AccountTier::Premium,
            _ => AccountTier::Standard,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("duration ceiling must be greater than zero")]
    ZeroCeiling,
}

/// One bounded window of the source recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub start_offset_ms: u64,
    pub duration_ms: u64,
    pub sequence_index: u32,
    pub total_segments: u32,
}

impl Segment {
    /// Exclusive end of the window.
    pub fn end_offset_ms(&self) -> u64 {
        self.start_offset_ms + self.duration_ms
    }

    /// `"2/3"` style label, 1-based.
    pub fn label(&self) -> String {
        format!("{}/{}", self.sequence_index + 1, self.total_segments)
    }

    /// Caption suffix for threaded posts; single clips get none.
    pub fn caption_suffix(&self) -> Option<String> {
        if self.total_segments > 1 {
            Some(format!(" ({})", self.label()))
        } else {
            None
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Computes the ordered windows for a recording of `total_duration_ms`.
///
/// A recording at or under the ceiling, including an empty one, yields exactly
/// one segment covering all of it.
pub fn plan_segments(
    total_duration_ms: u64,
    ceiling: Duration,
) -> Result<Vec<Segment>, SegmentError> {
    let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    if ceiling_ms == 0 {
        return Err(SegmentError::ZeroCeiling);
    }

    if total_duration_ms <= ceiling_ms {
        return Ok(vec![Segment {
            start_offset_ms: 0,
            duration_ms: total_duration_ms,
            sequence_index: 0,
            total_segments: 1,
        }]);
    }

    let count = total_duration_ms.div_ceil(ceiling_ms);
    let total_segments = u32::try_from(count).unwrap_or(u32::MAX);

    Ok((0..count)
        .map(|i| {
            let start = i * ceiling_ms;
            let end = ((i + 1) * ceiling_ms).min(total_duration_ms);
            Segment {
                start_offset_ms: start,
                duration_ms: end - start,
                sequence_index: i as u32,
                total_segments,
            }
        })
        .collect())
}

/// [`plan_segments`] with the ceiling taken from the account tier.
pub fn plan_for_tier(total_duration_ms: u64, tier: AccountTier) -> Vec<Segment> {
    // Tier ceilings are non-zero constants.
    plan_segments(total_duration_ms, tier.duration_ceiling()).unwrap_or_default()
}
