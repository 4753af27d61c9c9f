use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("ffmpeg not found - is it installed?")]
    FfmpegNotFound,

    #[error("failed to spawn encoder for {stream_id}/{variant_id}: {reason}")]
    Spawn {
        stream_id: String,
        variant_id: String,
        reason: String,
    },

    #[error("encoder for {stream_id}/{variant_id} did not become healthy within {timeout_secs}s")]
    StartTimeout {
        stream_id: String,
        variant_id: String,
        timeout_secs: u64,
    },

    #[error("encoder start for {stream_id}/{variant_id} was cancelled")]
    Cancelled {
        stream_id: String,
        variant_id: String,
    },

    #[error("no encoder running for {stream_id}/{variant_id}")]
    NotRunning {
        stream_id: String,
        variant_id: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
