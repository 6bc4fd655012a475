//! Energy-based voice activity detection with turn-boundary events.
//!
//! Each frame's RMS energy is classified as speech or silence through a
//! two-threshold hysteresis band, then run through a small state machine
//! that emits turn-boundary events:
//!
//! ```text
//! [Initial] ── energy > speech_threshold ──► [Speaking]  (SpeechStart)
//!
//! [Speaking] ── energy < silence_threshold ──► [Silence]  (SilenceDetected)
//!     ▲                                           │
//!     └────────── speech resumes ─────────────────┘  (SpeechResumed)
//!
//! [Silence] ── accumulated silence exceeds threshold ──► SilenceEnd
//! ```
//!
//! `SilenceEnd` only arms after `min_speech_duration_ms` of cumulative
//! speech, and fires at most once until speech resumes or `reset()` is
//! called.

use tracing::{debug, info};

use super::config::VadConfig;
use super::energy::EnergyWindow;
use crate::audio::{pcm, AudioFrame};

/// Event emitted by the detector on a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech began after silence. Fires once per armed cycle.
    SpeechStart,
    /// Speech gave way to silence, not yet long enough to end the turn.
    SilenceDetected,
    /// Speech resumed before the silence threshold elapsed.
    SpeechResumed,
    /// Continuous silence exceeded the configured duration after
    /// sufficient speech. The utterance is over.
    SilenceEnd,
}

/// Energy VAD with two-threshold hysteresis and time-gated turn boundaries.
///
/// Owned exclusively by the capture worker; not shared across threads.
pub struct EnergyVad {
    config: VadConfig,
    window: EnergyWindow,
    /// Nominal samples per frame; shorter frames count as zero energy.
    frame_samples: usize,

    /// Hysteresis classification of the most recent frame.
    classified_speech: bool,
    /// Whether the event machine is in the speaking sub-state.
    speaking: bool,
    speech_ms: f64,
    silence_ms: f64,
    /// Latch preventing duplicate SilenceEnd within one quiet stretch.
    silence_end_fired: bool,
}

impl EnergyVad {
    pub fn new(config: VadConfig, frame_samples: usize) -> Self {
        Self {
            window: EnergyWindow::new(config.energy_window),
            config,
            frame_samples,
            classified_speech: false,
            speaking: false,
            speech_ms: 0.0,
            silence_ms: 0.0,
            silence_end_fired: false,
        }
    }

    /// Process one frame and return any boundary event it triggered.
    pub fn process(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        // Partial frames occur at end of stream; score them as silence.
        let energy = if frame.is_partial(self.frame_samples) {
            0.0
        } else {
            pcm::rms(&frame.samples)
        };
        self.window.push(energy);

        let duration = frame.duration_ms();
        if self.classify(energy) {
            self.on_speech_frame(duration)
        } else {
            self.on_silence_frame(duration)
        }
    }

    /// Smoothed audio level over the sliding window, for visualization.
    pub fn audio_level(&self) -> f32 {
        self.window.mean()
    }

    /// Whether the detector is currently inside a speech run.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Clear the energy window, accumulators, and fired latch.
    ///
    /// Called when a turn closes so the next turn starts without stale
    /// hysteresis.
    pub fn reset(&mut self) {
        self.window.clear();
        self.classified_speech = false;
        self.speaking = false;
        self.speech_ms = 0.0;
        self.silence_ms = 0.0;
        self.silence_end_fired = false;
        debug!("vad: state reset");
    }

    /// Two-threshold hysteresis: energies between the thresholds keep the
    /// previous classification.
    fn classify(&mut self, energy: f32) -> bool {
        if energy > self.config.speech_threshold {
            self.classified_speech = true;
        } else if energy < self.config.silence_threshold {
            self.classified_speech = false;
        }
        self.classified_speech
    }

    fn on_speech_frame(&mut self, duration_ms: f64) -> Option<VadEvent> {
        let was_speaking = self.speaking;
        let had_speech = self.speech_ms > 0.0;
        let silence_before = self.silence_ms;

        self.speaking = true;
        self.speech_ms += duration_ms;
        self.silence_ms = 0.0;
        self.silence_end_fired = false;

        if was_speaking {
            return None;
        }
        if had_speech && silence_before > 0.0 {
            debug!("vad: speech resumed after {silence_before:.0}ms silence");
            Some(VadEvent::SpeechResumed)
        } else {
            debug!("vad: speech started");
            Some(VadEvent::SpeechStart)
        }
    }

    fn on_silence_frame(&mut self, duration_ms: f64) -> Option<VadEvent> {
        let was_speaking = self.speaking;
        self.silence_ms += duration_ms;

        if was_speaking {
            self.speaking = false;
            if self.speech_ms < self.config.min_speech_duration_ms as f64 {
                debug!(
                    "vad: ignoring silence after {:.0}ms speech (min {}ms)",
                    self.speech_ms, self.config.min_speech_duration_ms
                );
                return None;
            }
            debug!("vad: silence after {:.0}ms of speech", self.speech_ms);
            return Some(VadEvent::SilenceDetected);
        }

        if self.silence_end_fired
            || self.speech_ms < self.config.min_speech_duration_ms as f64
            || self.silence_ms <= self.config.silence_duration_ms as f64
        {
            return None;
        }

        self.silence_end_fired = true;
        info!(
            "vad: utterance ended after {:.0}ms silence ({:.0}ms speech)",
            self.silence_ms, self.speech_ms
        );
        Some(VadEvent::SilenceEnd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A frame of constant amplitude whose RMS equals `energy`.
    fn frame(energy: f32, samples: usize, sample_rate: u32, seq: u64) -> AudioFrame {
        let amplitude = (energy * i16::MAX as f32) as i16;
        AudioFrame::new(vec![amplitude; samples], seq, sample_rate)
    }

    /// 100ms frames at 16kHz.
    fn frame_100ms(energy: f32, seq: u64) -> AudioFrame {
        frame(energy, 1600, 16000, seq)
    }

    fn vad(config: VadConfig) -> EnergyVad {
        EnergyVad::new(config, 1600)
    }

    #[test]
    fn silence_without_speech_emits_nothing() {
        let mut vad = vad(VadConfig::default());
        for i in 0..20 {
            assert_eq!(vad.process(&frame_100ms(0.0, i)), None);
        }
        assert!(!vad.is_speaking());
    }

    #[test]
    fn speech_start_fires_once() {
        let mut vad = vad(VadConfig::default());
        assert_eq!(
            vad.process(&frame_100ms(0.8, 0)),
            Some(VadEvent::SpeechStart)
        );
        assert_eq!(vad.process(&frame_100ms(0.9, 1)), None);
        assert_eq!(vad.process(&frame_100ms(0.7, 2)), None);
        assert!(vad.is_speaking());
    }

    // Energy samples [0,0,0,0.5,0.5,0.5,0.5,0,0,0,0,0,0,0,0] at 100ms per
    // sample with thresholds 0.4/0.1, 600ms silence, 150ms min speech:
    // SpeechStart at index 3, SilenceEnd at index 13.
    #[test]
    fn canonical_turn_timeline() {
        let config = VadConfig {
            speech_threshold: 0.4,
            silence_threshold: 0.1,
            silence_duration_ms: 600,
            min_speech_duration_ms: 150,
            energy_window: 10,
        };
        let mut vad = vad(config);
        let energies = [
            0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ];

        let mut events = Vec::new();
        for (i, &e) in energies.iter().enumerate() {
            events.push((i, vad.process(&frame_100ms(e, i as u64))));
        }

        assert_eq!(events[3].1, Some(VadEvent::SpeechStart));
        assert_eq!(events[7].1, Some(VadEvent::SilenceDetected));
        assert_eq!(events[13].1, Some(VadEvent::SilenceEnd));
        for (i, ev) in &events {
            match i {
                3 | 7 | 13 => {}
                _ => assert_eq!(*ev, None, "unexpected event at index {i}: {ev:?}"),
            }
        }
    }

    #[test]
    fn silence_end_fires_only_once() {
        let config = VadConfig::default()
            .with_silence_duration_ms(200)
            .with_min_speech_duration_ms(100);
        let mut vad = vad(config);

        vad.process(&frame_100ms(0.8, 0));
        vad.process(&frame_100ms(0.8, 1));
        vad.process(&frame_100ms(0.0, 2)); // SilenceDetected
        vad.process(&frame_100ms(0.0, 3)); // 200ms, not yet over
        assert_eq!(vad.process(&frame_100ms(0.0, 4)), Some(VadEvent::SilenceEnd));
        for i in 5..12 {
            assert_eq!(vad.process(&frame_100ms(0.0, i)), None);
        }
    }

    #[test]
    fn brief_noise_burst_never_ends_a_turn() {
        let config = VadConfig::default()
            .with_silence_duration_ms(200)
            .with_min_speech_duration_ms(300);
        let mut vad = vad(config);

        // A single 100ms burst is under the min-speech gate.
        assert_eq!(
            vad.process(&frame_100ms(0.8, 0)),
            Some(VadEvent::SpeechStart)
        );
        for i in 1..10 {
            assert_eq!(vad.process(&frame_100ms(0.0, i)), None);
        }
    }

    #[test]
    fn pause_and_resume_within_a_turn() {
        let config = VadConfig::default()
            .with_silence_duration_ms(500)
            .with_min_speech_duration_ms(100);
        let mut vad = vad(config);

        assert_eq!(
            vad.process(&frame_100ms(0.8, 0)),
            Some(VadEvent::SpeechStart)
        );
        vad.process(&frame_100ms(0.8, 1));
        assert_eq!(
            vad.process(&frame_100ms(0.0, 2)),
            Some(VadEvent::SilenceDetected)
        );
        assert_eq!(
            vad.process(&frame_100ms(0.8, 3)),
            Some(VadEvent::SpeechResumed)
        );
    }

    #[test]
    fn hysteresis_holds_between_thresholds() {
        let config = VadConfig {
            speech_threshold: 0.4,
            silence_threshold: 0.1,
            ..Default::default()
        };
        let mut vad = vad(config);

        assert_eq!(
            vad.process(&frame_100ms(0.5, 0)),
            Some(VadEvent::SpeechStart)
        );
        // 0.25 sits inside the band: still classified as speech.
        assert_eq!(vad.process(&frame_100ms(0.25, 1)), None);
        assert!(vad.is_speaking());
        // Dropping below the silence threshold flips the classification.
        assert_eq!(
            vad.process(&frame_100ms(0.05, 2)),
            Some(VadEvent::SilenceDetected)
        );
        assert!(!vad.is_speaking());
        // Back inside the band: now held as silence, no event.
        assert_eq!(vad.process(&frame_100ms(0.25, 3)), None);
        assert!(!vad.is_speaking());
    }

    #[test]
    fn partial_final_frame_counts_as_silence() {
        let mut vad = vad(VadConfig::default());
        vad.process(&frame_100ms(0.8, 0));
        vad.process(&frame_100ms(0.8, 1));
        // Loud but short frame: scored as zero energy.
        let partial = frame(0.9, 100, 16000, 2);
        assert_eq!(vad.process(&partial), Some(VadEvent::SilenceDetected));
    }

    #[test]
    fn reset_rearms_speech_start() {
        let config = VadConfig::default()
            .with_silence_duration_ms(200)
            .with_min_speech_duration_ms(100);
        let mut vad = vad(config);

        vad.process(&frame_100ms(0.8, 0));
        vad.process(&frame_100ms(0.8, 1));
        vad.process(&frame_100ms(0.0, 2));
        vad.process(&frame_100ms(0.0, 3));
        assert_eq!(vad.process(&frame_100ms(0.0, 4)), Some(VadEvent::SilenceEnd));

        // Without a reset, renewed speech reads as a resume.
        assert_eq!(
            vad.process(&frame_100ms(0.8, 5)),
            Some(VadEvent::SpeechResumed)
        );

        vad.reset();
        assert_eq!(
            vad.process(&frame_100ms(0.8, 6)),
            Some(VadEvent::SpeechStart)
        );
        // Window was cleared on reset, so one frame defines the mean.
        assert!((vad.audio_level() - 0.8).abs() < 1e-3);
    }

    #[test]
    fn audio_level_tracks_window_mean() {
        let mut vad = vad(VadConfig::default());
        assert_eq!(vad.audio_level(), 0.0);
        vad.process(&frame_100ms(0.4, 0));
        vad.process(&frame_100ms(0.0, 1));
        let level = vad.audio_level();
        assert!((level - 0.2).abs() < 1e-3, "level was {level}");
    }
}
