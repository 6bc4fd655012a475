//! The microphone capability seam.

use async_trait::async_trait;

use crate::audio::AudioFrame;

/// Capture failures. Device loss is fatal to the session until the user
/// remediates (permission, hardware) and resets.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture stream failed: {0}")]
    Stream(String),
}

/// An open microphone producing fixed-size PCM frames.
///
/// The capture worker owns the source exclusively; implementations release
/// the device when dropped, which covers every worker exit path.
#[async_trait]
pub trait MicrophoneSource: Send {
    /// Capture sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Nominal samples per frame. The final frame of a stream may be
    /// shorter.
    fn frame_size(&self) -> usize;

    /// The next captured frame. `Ok(None)` means the stream ended.
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, CaptureError>;
}
