//! Adaptive Bitrate Policy for IPTV Stream Sessions
//!
//! This crate decides which quality variants of a stream should be
//! advertised to clients, based on observed delivery throughput.
//!
//! # Components
//!
//! - [`config`]: Tunable policy constants (safety margin, hysteresis)
//! - [`ladder`]: Quality variant types and ladder validation
//! - [`estimator`]: EWMA throughput estimation from delivery samples
//! - [`policy`]: Hysteresis-damped variant switching decisions

mod config;
mod estimator;
mod ladder;
mod policy;

pub use config::PolicyConfig;
pub use estimator::{BandwidthEstimator, BandwidthSample};
pub use ladder::{
    derive_bandwidth, effective_bandwidth, validate_ladder, LadderError, QualityVariant,
};
pub use policy::{SwitchDecision, SwitchPolicy, SwitchReason};
