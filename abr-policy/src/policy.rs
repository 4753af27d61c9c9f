//! Variant switch policy with asymmetric hysteresis
//!
//! Turns a smoothed throughput estimate into a recommended enabled-variant
//! set. Downgrades need a sustained breach before they take effect and
//! upgrades need an even longer stretch of headroom, so a noisy link does
//! not oscillate between ladder rungs. The output is a recommendation
//! only; the session manager is the sole component that mutates session
//! state from it.

use std::collections::BTreeSet;
use std::time::Instant;

use serde::Serialize;

use crate::config::PolicyConfig;
use crate::ladder::{effective_bandwidth, QualityVariant};

/// Why a decision recommends what it does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchReason {
    /// Keep the current set (includes "still inside a hysteresis hold")
    NoChange,
    /// Sustained throughput shortfall; drop higher variants
    BandwidthDrop,
    /// Sustained headroom; re-add higher variants
    BandwidthRecovery,
}

/// Output of one policy evaluation
#[derive(Debug, Clone)]
pub struct SwitchDecision {
    /// Variant ids that should be enabled
    pub recommended: BTreeSet<String>,
    pub reason: SwitchReason,
}

/// Per-session switching state
///
/// Holds the hysteresis clocks for one session. `evaluate` takes the
/// current time explicitly so decisions are deterministic under test.
#[derive(Debug)]
pub struct SwitchPolicy {
    config: PolicyConfig,
    /// When the estimate first fell below the current set's needs
    below_since: Option<Instant>,
    /// When the estimate first showed headroom for a higher set
    headroom_since: Option<Instant>,
}

impl SwitchPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            below_since: None,
            headroom_since: None,
        }
    }

    /// Recommend an enabled-variant set for the given ladder and estimate.
    ///
    /// `ladder` is the session's eligible variants (operator-disabled ones
    /// already filtered out), `enabled` the ids currently advertised.
    /// With no estimate yet, the full ladder is recommended unchanged;
    /// the policy never acts on missing data.
    pub fn evaluate(
        &mut self,
        ladder: &[QualityVariant],
        enabled: &BTreeSet<String>,
        estimate: Option<u64>,
        now: Instant,
    ) -> SwitchDecision {
        let Some(estimate) = estimate else {
            return SwitchDecision {
                recommended: ladder.iter().map(|v| v.id.clone()).collect(),
                reason: SwitchReason::NoChange,
            };
        };

        let target = self.candidate_set(ladder, estimate);
        if target == *enabled {
            self.below_since = None;
            self.headroom_since = None;
            return SwitchDecision {
                recommended: target,
                reason: SwitchReason::NoChange,
            };
        }

        let target_top = top_bandwidth(ladder, &target);
        let enabled_top = top_bandwidth(ladder, enabled);

        if target_top < enabled_top {
            // Downgrade path: hold until the breach has been sustained
            self.headroom_since = None;
            let since = *self.below_since.get_or_insert(now);
            if now.duration_since(since) >= self.config.downgrade_hold() {
                self.below_since = None;
                tracing::debug!(
                    estimate,
                    recommended = ?target,
                    "sustained bandwidth shortfall, dropping higher variants"
                );
                return SwitchDecision {
                    recommended: target,
                    reason: SwitchReason::BandwidthDrop,
                };
            }
        } else {
            // Upgrade path: deliberately slower than downgrade
            self.below_since = None;
            let since = *self.headroom_since.get_or_insert(now);
            if now.duration_since(since) >= self.config.upgrade_hold() {
                self.headroom_since = None;
                tracing::debug!(
                    estimate,
                    recommended = ?target,
                    "sustained headroom, restoring higher variants"
                );
                return SwitchDecision {
                    recommended: target,
                    reason: SwitchReason::BandwidthRecovery,
                };
            }
        }

        SwitchDecision {
            recommended: enabled.clone(),
            reason: SwitchReason::NoChange,
        }
    }

    /// Variants that fit under the safety margin. Never empty: when
    /// nothing fits, the single lowest-bandwidth variant is forced so a
    /// client always has a playable option.
    fn candidate_set(&self, ladder: &[QualityVariant], estimate: u64) -> BTreeSet<String> {
        let ceiling = estimate as f64 * self.config.safety_margin;
        let fitting: BTreeSet<String> = ladder
            .iter()
            .filter(|v| effective_bandwidth(v) as f64 <= ceiling)
            .map(|v| v.id.clone())
            .collect();

        if !fitting.is_empty() {
            return fitting;
        }

        ladder
            .iter()
            .min_by_key(|v| effective_bandwidth(v))
            .map(|v| v.id.clone())
            .into_iter()
            .collect()
    }

    /// Clear hysteresis clocks (session restart).
    pub fn reset(&mut self) {
        self.below_since = None;
        self.headroom_since = None;
    }
}

fn top_bandwidth(ladder: &[QualityVariant], ids: &BTreeSet<String>) -> u64 {
    ladder
        .iter()
        .filter(|v| ids.contains(&v.id))
        .map(effective_bandwidth)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ladder() -> Vec<QualityVariant> {
        let mk = |id: &str, w: u32, h: u32, bw: u64| QualityVariant {
            id: id.to_string(),
            label: id.to_string(),
            width: w,
            height: h,
            video_bitrate: bw,
            audio_bitrate: 0,
            bandwidth: bw,
            enabled: true,
        };
        vec![
            mk("480p", 854, 480, 800_000),
            mk("720p", 1280, 720, 2_500_000),
            mk("1080p", 1920, 1080, 5_000_000),
        ]
    }

    fn ids(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn instant_policy() -> SwitchPolicy {
        // Zero holds: decisions apply on the first evaluation
        SwitchPolicy::new(PolicyConfig {
            downgrade_hold_secs: 0,
            upgrade_hold_secs: 0,
            ..PolicyConfig::default()
        })
    }

    #[test]
    fn test_margin_excludes_oversized_variant() {
        let mut policy = instant_policy();
        let enabled = ids(&["480p", "720p", "1080p"]);

        // 3 MB/s * 0.85 = 2_550_000: 1080p (5M) does not fit
        let d = policy.evaluate(&ladder(), &enabled, Some(3_000_000), Instant::now());
        assert_eq!(d.recommended, ids(&["480p", "720p"]));
        assert_eq!(d.reason, SwitchReason::BandwidthDrop);
    }

    #[test]
    fn test_never_recommends_empty_set() {
        let mut policy = instant_policy();
        let enabled = ids(&["480p", "720p", "1080p"]);

        for estimate in [0, 1, 100_000] {
            let d = policy.evaluate(&ladder(), &enabled, Some(estimate), Instant::now());
            assert!(!d.recommended.is_empty(), "empty set at estimate {estimate}");
        }

        let d = policy.evaluate(&ladder(), &enabled, Some(0), Instant::now());
        assert_eq!(d.recommended, ids(&["480p"]));
    }

    #[test]
    fn test_unknown_estimate_keeps_full_ladder() {
        let mut policy = instant_policy();
        let d = policy.evaluate(&ladder(), &ids(&["480p"]), None, Instant::now());
        assert_eq!(d.reason, SwitchReason::NoChange);
        assert_eq!(d.recommended, ids(&["480p", "720p", "1080p"]));
    }

    #[test]
    fn test_downgrade_requires_sustained_breach() {
        let mut policy = SwitchPolicy::new(PolicyConfig::default());
        let enabled = ids(&["480p", "720p", "1080p"]);
        let t0 = Instant::now();

        // Short-lived drop: no change before the 10s hold expires
        let d = policy.evaluate(&ladder(), &enabled, Some(3_000_000), t0);
        assert_eq!(d.reason, SwitchReason::NoChange);
        assert_eq!(d.recommended, enabled);

        let d = policy.evaluate(
            &ladder(),
            &enabled,
            Some(3_000_000),
            t0 + Duration::from_secs(5),
        );
        assert_eq!(d.reason, SwitchReason::NoChange);

        // At the hold boundary the downgrade applies
        let d = policy.evaluate(
            &ladder(),
            &enabled,
            Some(3_000_000),
            t0 + Duration::from_secs(10),
        );
        assert_eq!(d.reason, SwitchReason::BandwidthDrop);
        assert_eq!(d.recommended, ids(&["480p", "720p"]));
    }

    #[test]
    fn test_recovery_resets_downgrade_clock() {
        let mut policy = SwitchPolicy::new(PolicyConfig::default());
        let enabled = ids(&["480p", "720p", "1080p"]);
        let t0 = Instant::now();

        policy.evaluate(&ladder(), &enabled, Some(3_000_000), t0);
        // Estimate recovers; every variant fits again, clock resets
        let d = policy.evaluate(
            &ladder(),
            &enabled,
            Some(10_000_000),
            t0 + Duration::from_secs(5),
        );
        assert_eq!(d.reason, SwitchReason::NoChange);

        // A fresh breach must sustain the full hold again
        policy.evaluate(&ladder(), &enabled, Some(3_000_000), t0 + Duration::from_secs(6));
        let d = policy.evaluate(
            &ladder(),
            &enabled,
            Some(3_000_000),
            t0 + Duration::from_secs(15),
        );
        assert_eq!(d.reason, SwitchReason::NoChange);
        let d = policy.evaluate(
            &ladder(),
            &enabled,
            Some(3_000_000),
            t0 + Duration::from_secs(16),
        );
        assert_eq!(d.reason, SwitchReason::BandwidthDrop);
    }

    #[test]
    fn test_upgrade_slower_than_downgrade() {
        let mut policy = SwitchPolicy::new(PolicyConfig::default());
        let enabled = ids(&["480p", "720p"]);
        let t0 = Instant::now();

        // Plenty of headroom for 1080p, but only after 20s sustained
        let estimate = Some(10_000_000);
        let d = policy.evaluate(&ladder(), &enabled, estimate, t0);
        assert_eq!(d.reason, SwitchReason::NoChange);

        let d = policy.evaluate(&ladder(), &enabled, estimate, t0 + Duration::from_secs(10));
        assert_eq!(d.reason, SwitchReason::NoChange, "upgrade must outlast the downgrade hold");

        let d = policy.evaluate(&ladder(), &enabled, estimate, t0 + Duration::from_secs(20));
        assert_eq!(d.reason, SwitchReason::BandwidthRecovery);
        assert_eq!(d.recommended, ids(&["480p", "720p", "1080p"]));
    }

    #[test]
    fn test_stable_set_resets_clocks() {
        let mut policy = SwitchPolicy::new(PolicyConfig::default());
        let enabled = ids(&["480p", "720p"]);
        let t0 = Instant::now();

        // 720p fits exactly: 2_500_000 <= 3_000_000 * 0.85
        let d = policy.evaluate(&ladder(), &enabled, Some(3_000_000), t0);
        assert_eq!(d.reason, SwitchReason::NoChange);
        assert_eq!(d.recommended, enabled);
        assert!(policy.below_since.is_none());
        assert!(policy.headroom_since.is_none());
    }
}
