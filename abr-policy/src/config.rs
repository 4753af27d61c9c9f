//! Configuration for bandwidth estimation and switch decisions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Switch policy configuration
///
/// Stored in the panel config and used to initialize the estimator and
/// the per-session switch policy. The defaults are conservative starting
/// points; calibrate against real encoder/network behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Fraction of the estimated throughput a variant may consume
    /// before it is excluded (default: 0.85)
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    /// Seconds the estimate must stay below a variant's threshold before
    /// that variant is dropped (default: 10)
    #[serde(default = "default_downgrade_hold")]
    pub downgrade_hold_secs: u64,

    /// Seconds of sustained headroom before a higher variant is re-added
    /// (default: 20). Deliberately longer than the downgrade hold so that
    /// recovery does not flap.
    #[serde(default = "default_upgrade_hold")]
    pub upgrade_hold_secs: u64,

    /// EWMA decay factor for throughput smoothing (default: 0.3)
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,

    /// Number of raw samples retained per session (default: 5)
    #[serde(default = "default_sample_window")]
    pub sample_window: usize,
}

fn default_safety_margin() -> f64 {
    0.85
}

fn default_downgrade_hold() -> u64 {
    10
}

fn default_upgrade_hold() -> u64 {
    20
}

fn default_ewma_alpha() -> f64 {
    0.3
}

fn default_sample_window() -> usize {
    5
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            safety_margin: default_safety_margin(),
            downgrade_hold_secs: default_downgrade_hold(),
            upgrade_hold_secs: default_upgrade_hold(),
            ewma_alpha: default_ewma_alpha(),
            sample_window: default_sample_window(),
        }
    }
}

impl PolicyConfig {
    /// Minimum sustained breach before a downgrade takes effect
    pub fn downgrade_hold(&self) -> Duration {
        Duration::from_secs(self.downgrade_hold_secs)
    }

    /// Minimum sustained headroom before an upgrade takes effect
    pub fn upgrade_hold(&self) -> Duration {
        Duration::from_secs(self.upgrade_hold_secs)
    }
}
