//! Quality variant types and ladder validation
//!
//! A variant ladder is the ordered set of quality renditions configured
//! for a stream, listed from lowest to highest quality. The ladder is a
//! value object owned by the catalog; this module only validates it and
//! derives advertised bandwidth where the stored value is absent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Container/mux overhead added on top of the raw elementary bitrates
/// when deriving the advertised bandwidth (5%).
pub const CONTAINER_OVERHEAD: f64 = 0.05;

/// A single quality rendition of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityVariant {
    /// Stable identifier, unique within the stream's ladder (e.g. "720p")
    pub id: String,
    /// Display name shown to operators
    pub label: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Video bitrate in bits/sec
    pub video_bitrate: u64,
    /// Audio bitrate in bits/sec
    pub audio_bitrate: u64,
    /// Advertised bandwidth in bits/sec; 0 means "derive from bitrates"
    #[serde(default)]
    pub bandwidth: u64,
    /// Operator toggle; disabled variants never enter a session
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl QualityVariant {
    /// Pixel count, used for resolution ordering checks
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Compute the advertised bandwidth for a variant from its elementary
/// bitrates plus the fixed container overhead.
pub fn derive_bandwidth(variant: &QualityVariant) -> u64 {
    let raw = variant.video_bitrate + variant.audio_bitrate;
    (raw as f64 * (1.0 + CONTAINER_OVERHEAD)).round() as u64
}

/// Bandwidth actually advertised for a variant: the stored value when
/// present, otherwise derived from the bitrates.
pub fn effective_bandwidth(variant: &QualityVariant) -> u64 {
    if variant.bandwidth > 0 {
        variant.bandwidth
    } else {
        derive_bandwidth(variant)
    }
}

/// Ladder validation failures
#[derive(Debug, Error)]
pub enum LadderError {
    #[error("empty ladder")]
    Empty,

    #[error("duplicate variant id: {0}")]
    DuplicateId(String),

    #[error("variant {id} has non-positive bitrate")]
    InvalidBitrate { id: String },

    #[error("variant {higher} has lower bandwidth than {lower}; ladder must be monotonic")]
    NonMonotonicBandwidth { lower: String, higher: String },

    #[error("variant {higher} has higher bandwidth but fewer pixels than {lower}")]
    ResolutionOrder { lower: String, higher: String },
}

/// Validate a ladder before it enters a session.
///
/// Rejects empty ladders, duplicate ids, non-positive bitrates, and
/// mis-ordered ladders: listed low-to-high, each variant must carry at
/// least the bandwidth of its predecessor, and a higher-bandwidth variant
/// must not have a smaller resolution. Violations are configuration
/// errors surfaced to the operator, never silently corrected.
pub fn validate_ladder(variants: &[QualityVariant]) -> Result<(), LadderError> {
    if variants.is_empty() {
        return Err(LadderError::Empty);
    }

    let mut seen = std::collections::HashSet::new();
    for v in variants {
        if !seen.insert(v.id.as_str()) {
            return Err(LadderError::DuplicateId(v.id.clone()));
        }
        if v.video_bitrate == 0 || effective_bandwidth(v) == 0 {
            return Err(LadderError::InvalidBitrate { id: v.id.clone() });
        }
    }

    for pair in variants.windows(2) {
        let (lower, higher) = (&pair[0], &pair[1]);
        if effective_bandwidth(higher) < effective_bandwidth(lower) {
            return Err(LadderError::NonMonotonicBandwidth {
                lower: lower.id.clone(),
                higher: higher.id.clone(),
            });
        }
        if effective_bandwidth(higher) > effective_bandwidth(lower) && higher.pixels() < lower.pixels()
        {
            return Err(LadderError::ResolutionOrder {
                lower: lower.id.clone(),
                higher: higher.id.clone(),
            });
        }
    }

    Ok(())
}
