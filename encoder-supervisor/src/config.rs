//! Supervisor configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for encoder process supervision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Base directory for segment output (one subdir per stream/variant)
    pub output_dir: PathBuf,

    /// Source URL template; `{stream}` is replaced by the stream id
    #[serde(default = "default_source_url")]
    pub source_url: String,

    /// Target segment duration in seconds (default: 2)
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,

    /// Segments kept in each variant's playlist window (default: 6)
    #[serde(default = "default_list_size")]
    pub list_size: u32,

    /// Seconds to wait for a variant to come up before the attempt is
    /// treated as failed (default: 15)
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    /// Seconds to wait for teardown acknowledgment; on expiry the stop
    /// proceeds anyway and the leak is logged (default: 15)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Bring-up attempts per variant before it is reported failed
    /// (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay in seconds; doubles per attempt (default: 1)
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Playlist older than this is considered stale output (default: 10)
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_source_url() -> String {
    "rtmp://127.0.0.1/live/{stream}".to_string()
}

fn default_segment_seconds() -> u32 {
    2
}

fn default_list_size() -> u32 {
    6
}

fn default_start_timeout() -> u64 {
    15
}

fn default_stop_timeout() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    1
}

fn default_stale_after() -> u64 {
    10
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("/tmp/abr"),
            source_url: default_source_url(),
            segment_seconds: default_segment_seconds(),
            list_size: default_list_size(),
            start_timeout_secs: default_start_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            stale_after_secs: default_stale_after(),
        }
    }
}

impl SupervisorConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Exponential backoff delay for the given zero-based attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.backoff_base_secs << attempt.min(6))
    }

    /// Source URL for a stream.
    pub fn source_for(&self, stream_id: &str) -> String {
        self.source_url.replace("{stream}", stream_id)
    }
}
