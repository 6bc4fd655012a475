//! Real-time voice turn-taking pipeline.
//!
//! A user speaks; their speech is segmented into turns by an energy VAD,
//! streamed in chunks to a remote voice backend over a reconnecting
//! message channel, and the synthesized reply plays back through an
//! interruptible queue. Barge-in works at any time: speech during a reply
//! kills playback, signals the backend, and opens a fresh turn.
//!
//! The core is platform-independent. Embedders inject three capability
//! seams — [`MicrophoneSource`](core::capture::MicrophoneSource),
//! [`SinkProvider`](core::playback::SinkProvider), and
//! [`ChannelConnector`](core::transport::ChannelConnector) — or enable the
//! `device-audio` feature for real microphone/speaker adapters.

pub mod audio;
pub mod config;
pub mod core;
pub mod errors;
pub mod pipeline;
#[cfg(feature = "device-audio")]
pub mod platform;

// Re-export commonly used items for convenience
pub use crate::config::PipelineConfig;
pub use crate::core::controller::{TelemetryEvent, UserCommand, VoiceState};
pub use crate::core::transport::ConnectionState;
pub use crate::errors::{PipelineError, PipelineResult};
pub use crate::pipeline::VoicePipeline;
