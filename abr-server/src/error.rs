use encoder_supervisor::SupervisorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AbrError {
    #[error("invalid ladder: {0}")]
    Validation(#[from] abr_policy::LadderError),

    #[error("no stored ladder for stream: {0}")]
    StreamNotFound(String),

    #[error("no session for stream: {0}")]
    SessionNotFound(String),

    #[error("variant not available: {stream_id}/{variant_id}")]
    VariantNotAvailable {
        stream_id: String,
        variant_id: String,
    },

    #[error("all variant encoders failed for stream: {0}")]
    EncodersFailed(String),

    #[error("encoder error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
