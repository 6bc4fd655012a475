//! Aggregate error type for pipeline construction and operation.

use crate::core::capture::CaptureError;
use crate::core::playback::PlaybackError;
use crate::core::transport::TransportError;

/// Errors surfaced by the pipeline to its embedder.
///
/// Device and exhausted-transport failures also show up as
/// [`VoiceState::Error`](crate::core::controller::VoiceState) /
/// [`ConnectionState::Failed`](crate::core::transport::ConnectionState);
/// everything recoverable is handled internally and visible only in logs
/// and telemetry.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("playback error: {0}")]
    Playback(#[from] PlaybackError),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
