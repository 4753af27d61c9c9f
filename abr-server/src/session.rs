//! Session snapshot types and the status state machine
//!
//! An [`AbrSession`] is an immutable snapshot: mutations build a new
//! value and swap it in whole, so no reader ever observes a
//! half-updated enabled set.

use abr_policy::QualityVariant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Encoders are being brought up
    Initializing,
    /// At least one variant encoder is healthy
    Active,
    /// Explicitly stopped; terminal until a new start
    Stopped,
    /// Bring-up or runtime failure that could not self-heal
    Error,
}

impl SessionStatus {
    /// Whether the state machine permits this transition. No session
    /// may skip `Initializing` on its way to `Active`.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Initializing, Active)
                | (Initializing, Error)
                | (Initializing, Stopped)
                | (Active, Stopped)
                | (Active, Error)
                | (Error, Initializing)
                | (Error, Stopped)
        )
    }
}

/// One ABR session, at most one per stream id
#[derive(Debug, Clone, Serialize)]
pub struct AbrSession {
    pub stream_id: String,
    pub status: SessionStatus,
    /// Ladder snapshot; `enabled` flags here reflect switch decisions
    /// and encoder failures, never the stored catalog ladder
    pub variants: Vec<QualityVariant>,
    /// Last rendered master playlist; retained through `error` so
    /// connected clients degrade instead of hard-failing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_playlist: Option<String>,
    /// True when the playlist no longer reflects a healthy session
    pub stale: bool,
    pub created_at: DateTime<Utc>,
    /// Timestamp of the newest applied bandwidth sample; older samples
    /// are rejected to keep application in arrival order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample_at: Option<DateTime<Utc>>,
    /// Most recent smoothed throughput estimate, bytes/sec
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_estimate: Option<u64>,
    /// Raw sample window behind the estimate, oldest first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_samples: Vec<u64>,
}

impl AbrSession {
    pub fn new(stream_id: &str, variants: Vec<QualityVariant>) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            status: SessionStatus::Initializing,
            variants,
            master_playlist: None,
            stale: false,
            created_at: Utc::now(),
            last_sample_at: None,
            last_estimate: None,
            recent_samples: Vec::new(),
        }
    }

    /// Ids of currently enabled variants.
    pub fn enabled_ids(&self) -> std::collections::BTreeSet<String> {
        self.variants
            .iter()
            .filter(|v| v.enabled)
            .map(|v| v.id.clone())
            .collect()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            stream_id: self.stream_id.clone(),
            status: self.status,
            variant_count: self.variants.iter().filter(|v| v.enabled).count(),
        }
    }
}

/// Read-only registry listing entry
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub stream_id: String,
    pub status: SessionStatus,
    pub variant_count: usize,
}
