//! Microphone capture and chunked streaming of open turns.

pub mod source;
pub mod streamer;

pub use source::{CaptureError, MicrophoneSource};
pub use streamer::{
    CaptureCommand, CaptureConfig, CaptureEvent, CaptureHandle, CaptureStreamer, TurnClose,
};
