//! The audio output capability seam.

use async_trait::async_trait;
use bytes::Bytes;

/// Playback failures. Per-item errors never halt the queue.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackError {
    #[error("output device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("output failed: {0}")]
    Output(String),
}

/// A held audio output device.
///
/// `play` resolves when the payload has finished rendering. `halt` must stop
/// the device immediately and cause any in-flight `play` to resolve
/// promptly; it is called from the queue worker while a `play` future is
/// pending, which is why both methods take `&self`.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, audio: &Bytes, mime: &str) -> Result<(), PlaybackError>;
    fn halt(&self);
}

/// Acquires the output device on demand.
///
/// The queue worker acquires a sink when playback starts and drops it when
/// the queue drains, so the device is never held idle.
pub trait SinkProvider: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn AudioSink>, PlaybackError>;
}
