use thiserror::Error;

/// Errors from the ffmpeg subprocess pipe.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("Encoder executable not found: {0}")]
    EncoderNotFound(String),
    #[error("Failed to spawn encoder: {0}")]
    SpawnFailed(String),
    #[error("Encoder pipe unavailable: {0}")]
    PipeUnavailable(String),
    #[error("Failed to write to encoder: {0}")]
    WriteFailed(String),
    #[error("Encoder session already closed")]
    Closed,
    #[error("Encoder exited with code {exit_code}: {stderr}")]
    ProcessFailed { exit_code: i32, stderr: String },
}

/// Top-level error type for the recorder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("Failed to prepare output location: {0}")]
    Storage(String),
}
