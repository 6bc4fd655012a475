//! Fixed-duration PCM audio frames produced by the capture device.

use std::time::Instant;

/// A fixed-duration slice of mono PCM samples.
///
/// Frames are created by the capture device and owned exclusively by the
/// VAD/streamer until consumed. The sequence number is monotonic within a
/// capture session.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Signed 16-bit mono PCM samples.
    pub samples: Vec<i16>,
    /// Monotonic frame sequence number within the capture session.
    pub seq: u64,
    /// Capture timestamp.
    pub captured_at: Instant,
    /// Sample rate in Hz (e.g. 16000).
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame from raw samples.
    pub fn new(samples: Vec<i16>, seq: u64, sample_rate: u32) -> Self {
        Self {
            samples,
            seq,
            captured_at: Instant::now(),
            sample_rate,
        }
    }

    /// Frame duration in milliseconds, derived from sample count and rate.
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.samples.len() as f64 / self.sample_rate as f64) * 1000.0
    }

    /// Whether this frame is shorter than the expected frame size.
    ///
    /// Partial frames occur at end of stream; energy analysis treats them
    /// as silence.
    pub fn is_partial(&self, expected_samples: usize) -> bool {
        self.samples.len() < expected_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_from_samples_and_rate() {
        let frame = AudioFrame::new(vec![0i16; 1600], 0, 16000);
        assert_eq!(frame.duration_ms(), 100.0);
    }

    #[test]
    fn zero_sample_rate_yields_zero_duration() {
        let frame = AudioFrame::new(vec![0i16; 1600], 0, 0);
        assert_eq!(frame.duration_ms(), 0.0);
    }

    #[test]
    fn partial_frame_detection() {
        let frame = AudioFrame::new(vec![0i16; 100], 0, 16000);
        assert!(frame.is_partial(480));
        assert!(!frame.is_partial(100));
    }
}
