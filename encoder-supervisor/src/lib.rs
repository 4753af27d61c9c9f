//! Encoder Supervision for ABR Streams
//!
//! The actual audio/video transcoding is done by an external encoder
//! process (ffmpeg), one per enabled variant of a stream. This crate
//! owns that boundary: it brings processes up with a bounded retry
//! budget, monitors liveness and output freshness, tears them down on
//! stop, and reports health changes over a typed event channel.
//!
//! The [`EncoderSupervisor`] trait is what the session manager programs
//! against; [`FfmpegSupervisor`] is the production implementation and
//! [`StubSupervisor`] a deterministic double for tests.

pub mod config;
pub mod error;
mod process;
mod stub;
mod supervisor;

pub use config::SupervisorConfig;
pub use error::SupervisorError;
pub use stub::{StubSupervisor, VariantScript};
pub use supervisor::{EncoderSupervisor, FfmpegSupervisor, HealthEvent, SegmentMeta};

/// Check that all required dependencies (ffmpeg) are available.
pub async fn check_dependencies() -> Result<(), SupervisorError> {
    supervisor::check_ffmpeg().await
}
