//! Configuration for the energy-based voice activity detector.

/// Tuning parameters for [`EnergyVad`](super::EnergyVad).
///
/// The two-threshold design gives hysteresis: a frame must rise above
/// `speech_threshold` to be classified as speech, and fall below
/// `silence_threshold` to be classified as silence. Energies in between keep
/// the previous classification, which prevents chatter near a single cutoff.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Normalized RMS energy above which a frame counts as speech (0.0 to 1.0).
    pub speech_threshold: f32,

    /// Normalized RMS energy below which a frame counts as silence.
    ///
    /// Must be lower than `speech_threshold`.
    pub silence_threshold: f32,

    /// Continuous silence that must accumulate after speech before the
    /// detector declares the utterance over (ms).
    pub silence_duration_ms: u64,

    /// Cumulative speech required before the silence timer is armed (ms).
    ///
    /// Brief noise bursts shorter than this never finalize a turn on
    /// their own.
    pub min_speech_duration_ms: u64,

    /// Capacity of the sliding energy window backing the smoothed audio
    /// level observable.
    pub energy_window: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.4,
            silence_threshold: 0.1,
            // Natural mid-utterance pauses run 200-400ms; anything shorter
            // than this must not end the turn.
            silence_duration_ms: 800,
            min_speech_duration_ms: 200,
            energy_window: 10,
        }
    }
}

impl VadConfig {
    /// Set the speech threshold, clamped to [0.0, 1.0].
    pub fn with_speech_threshold(mut self, threshold: f32) -> Self {
        self.speech_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the silence threshold, clamped to [0.0, 1.0].
    pub fn with_silence_threshold(mut self, threshold: f32) -> Self {
        self.silence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the silence duration required to end a turn.
    pub fn with_silence_duration_ms(mut self, ms: u64) -> Self {
        self.silence_duration_ms = ms;
        self
    }

    /// Set the minimum cumulative speech before silence tracking arms.
    pub fn with_min_speech_duration_ms(mut self, ms: u64) -> Self {
        self.min_speech_duration_ms = ms;
        self
    }

    /// Validate threshold ordering and window capacity.
    pub fn validate(&self) -> Result<(), String> {
        if self.silence_threshold >= self.speech_threshold {
            return Err(format!(
                "silence_threshold ({}) must be below speech_threshold ({})",
                self.silence_threshold, self.speech_threshold
            ));
        }
        if self.energy_window == 0 {
            return Err("energy_window must be at least 1".to_string());
        }
        Ok(())
    }
}
