//! Throughput estimation from segment-delivery samples
//!
//! Each session gets a bounded window of raw samples and a smoothed
//! EWMA estimate. Single-sample noise must not swing the estimate; the
//! first sample seeds it directly so startup is not biased toward zero.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

use crate::config::PolicyConfig;

/// One delivery-timing observation for a session
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct BandwidthSample {
    /// Observed delivery throughput in bytes/sec
    pub observed_bytes_per_sec: u64,
    /// When the observation was taken (client or edge clock)
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionWindow {
    samples: VecDeque<u64>,
    estimate: f64,
}

/// Per-session EWMA throughput estimator
///
/// Owns its sample windows, keyed by stream id. Other components read
/// estimates through [`BandwidthEstimator::current_estimate`]; nothing
/// else mutates the windows.
#[derive(Debug)]
pub struct BandwidthEstimator {
    alpha: f64,
    window: usize,
    sessions: HashMap<String, SessionWindow>,
}

impl BandwidthEstimator {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            alpha: config.ewma_alpha,
            window: config.sample_window.max(1),
            sessions: HashMap::new(),
        }
    }

    /// Fold a new sample into the session's window and return the
    /// updated smoothed estimate in bytes/sec.
    pub fn push_sample(&mut self, stream_id: &str, sample: &BandwidthSample) -> u64 {
        let observed = sample.observed_bytes_per_sec as f64;

        let entry = self
            .sessions
            .entry(stream_id.to_string())
            .or_insert_with(|| SessionWindow {
                samples: VecDeque::new(),
                estimate: observed,
            });

        if !entry.samples.is_empty() {
            entry.estimate = self.alpha * observed + (1.0 - self.alpha) * entry.estimate;
        }

        entry.samples.push_back(sample.observed_bytes_per_sec);
        while entry.samples.len() > self.window {
            entry.samples.pop_front();
        }

        entry.estimate.round() as u64
    }

    /// Smoothed estimate for a session, or `None` before any sample.
    pub fn current_estimate(&self, stream_id: &str) -> Option<u64> {
        self.sessions
            .get(stream_id)
            .map(|w| w.estimate.round() as u64)
    }

    /// Raw retained samples for a session, oldest first. Surfaced in
    /// session diagnostics alongside the smoothed estimate.
    pub fn recent_samples(&self, stream_id: &str) -> Vec<u64> {
        self.sessions
            .get(stream_id)
            .map(|w| w.samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop all state for a session (called when the session stops).
    pub fn forget(&mut self, stream_id: &str) {
        self.sessions.remove(stream_id);
    }

    /// Number of sessions with at least one sample.
    pub fn tracked_count(&self) -> usize {
        self.sessions.len()
    }
}
