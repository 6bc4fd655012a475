//! Session configuration.
//!
//! The pipeline treats its configuration as an immutable snapshot: tune,
//! validate, spawn. `from_env` mirrors how deployments configure the
//! pipeline without code.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;
use uuid::Uuid;

use crate::core::capture::CaptureConfig;
use crate::core::controller::ControllerConfig;
use crate::core::transport::{BackoffConfig, TransportConfig};
use crate::core::vad::VadConfig;
use crate::errors::{PipelineError, PipelineResult};

/// Everything the pipeline needs for one session.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Backend endpoint (ws:// or wss://).
    pub endpoint: Url,
    /// Session identifier sent in the connect handshake.
    pub session_id: String,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Capture frame duration for device sources (ms).
    pub frame_duration_ms: u64,
    pub vad: VadConfig,
    pub capture: CaptureConfig,
    pub controller: ControllerConfig,
    pub backoff: BackoffConfig,
    /// Bound on connect plus handshake completion.
    pub connect_timeout: Duration,
}

impl PipelineConfig {
    /// Defaults for the given endpoint, with a fresh session id.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            session_id: Uuid::new_v4().to_string(),
            sample_rate: 16000,
            frame_duration_ms: 30,
            vad: VadConfig::default(),
            capture: CaptureConfig::default(),
            controller: ControllerConfig::default(),
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Build from environment variables (loading `.env` if present).
    ///
    /// `PARLA_ENDPOINT` selects the backend; the remaining variables
    /// override individual defaults:
    /// `PARLA_SAMPLE_RATE`, `PARLA_FRAME_MS`, `PARLA_CHUNK_MS`,
    /// `PARLA_SPEECH_THRESHOLD`, `PARLA_SILENCE_THRESHOLD`,
    /// `PARLA_SILENCE_DURATION_MS`, `PARLA_MIN_SPEECH_MS`,
    /// `PARLA_PROCESSING_TIMEOUT_MS`, `PARLA_BACKOFF_INITIAL_MS`,
    /// `PARLA_BACKOFF_CEILING_MS`, `PARLA_BACKOFF_MAX_ATTEMPTS`.
    pub fn from_env() -> PipelineResult<Self> {
        let _ = dotenvy::dotenv();

        let endpoint_raw =
            env::var("PARLA_ENDPOINT").unwrap_or_else(|_| "ws://localhost:3001/ws".to_string());
        let endpoint = Url::parse(&endpoint_raw)
            .map_err(|e| PipelineError::Config(format!("invalid PARLA_ENDPOINT: {e}")))?;

        let mut config = Self::new(endpoint);

        if let Some(rate) = parse_env::<u32>("PARLA_SAMPLE_RATE")? {
            config.sample_rate = rate;
        }
        if let Some(ms) = parse_env::<u64>("PARLA_FRAME_MS")? {
            config.frame_duration_ms = ms;
        }
        if let Some(ms) = parse_env::<u64>("PARLA_CHUNK_MS")? {
            config.capture.chunk_duration_ms = ms;
        }
        if let Some(threshold) = parse_env::<f32>("PARLA_SPEECH_THRESHOLD")? {
            config.vad.speech_threshold = threshold;
        }
        if let Some(threshold) = parse_env::<f32>("PARLA_SILENCE_THRESHOLD")? {
            config.vad.silence_threshold = threshold;
        }
        if let Some(ms) = parse_env::<u64>("PARLA_SILENCE_DURATION_MS")? {
            config.vad.silence_duration_ms = ms;
        }
        if let Some(ms) = parse_env::<u64>("PARLA_MIN_SPEECH_MS")? {
            config.vad.min_speech_duration_ms = ms;
        }
        if let Some(ms) = parse_env::<u64>("PARLA_PROCESSING_TIMEOUT_MS")? {
            config.controller.processing_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("PARLA_BACKOFF_INITIAL_MS")? {
            config.backoff.initial = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("PARLA_BACKOFF_CEILING_MS")? {
            config.backoff.ceiling = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_env::<u32>("PARLA_BACKOFF_MAX_ATTEMPTS")? {
            config.backoff.max_attempts = attempts;
        }

        config.validate()?;
        Ok(config)
    }

    /// Cross-check every component config.
    pub fn validate(&self) -> PipelineResult<()> {
        match self.endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(PipelineError::Config(format!(
                    "endpoint scheme must be ws or wss, got {other}"
                )));
            }
        }
        if self.sample_rate == 0 {
            return Err(PipelineError::Config("sample_rate must be non-zero".into()));
        }
        if self.frame_duration_ms == 0 {
            return Err(PipelineError::Config(
                "frame_duration_ms must be non-zero".into(),
            ));
        }
        self.vad.validate().map_err(PipelineError::Config)?;
        self.capture.validate().map_err(PipelineError::Config)?;
        self.controller.validate().map_err(PipelineError::Config)?;
        self.backoff.validate().map_err(PipelineError::Config)?;
        Ok(())
    }

    /// Nominal capture frame size in samples.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as u64 * self.frame_duration_ms / 1000).max(1) as usize
    }

    /// The transport slice of this configuration.
    pub fn transport(&self) -> TransportConfig {
        let mut transport = TransportConfig::new(self.endpoint.clone(), self.session_id.clone());
        transport.sample_rate = self.sample_rate;
        transport.connect_timeout = self.connect_timeout;
        transport.backoff = self.backoff;
        transport
    }
}

fn parse_env<T: FromStr>(name: &str) -> PipelineResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| PipelineError::Config(format!("invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PipelineConfig {
        PipelineConfig::new(Url::parse("ws://localhost:3001/ws").unwrap())
    }

    #[test]
    fn defaults_validate() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(base().session_id, base().session_id);
    }

    #[test]
    fn frame_samples_from_rate_and_duration() {
        let config = base();
        // 30ms at 16kHz
        assert_eq!(config.frame_samples(), 480);
    }

    #[test]
    fn rejects_non_websocket_endpoint() {
        let mut config = base();
        config.endpoint = Url::parse("https://example.com").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_vad_thresholds() {
        let mut config = base();
        config.vad.speech_threshold = 0.1;
        config.vad.silence_threshold = 0.4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn transport_slice_carries_session_settings() {
        let mut config = base();
        config.sample_rate = 8000;
        let transport = config.transport();
        assert_eq!(transport.sample_rate, 8000);
        assert_eq!(transport.session_id, config.session_id);
        assert_eq!(transport.endpoint, config.endpoint);
        assert!(transport.validate().is_ok());
    }
}
