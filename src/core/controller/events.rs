//! Inputs to the turn controller's mailbox.
//!
//! Every worker publishes into one single-consumer channel; the controller
//! is the only writer of [`VoiceState`](super::VoiceState), so transitions
//! serialize naturally.

use crate::core::capture::CaptureEvent;
use crate::core::playback::PlaybackEvent;
use crate::core::transport::TransportEvent;

/// User actions surfaced by the embedding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    /// Open a turn now, regardless of auto mode. While speaking, this is a
    /// barge-in.
    ManualStart,
    /// Close the open turn now instead of waiting for silence.
    ManualStop,
    /// Toggle whether detected speech opens turns automatically.
    ToggleAutoMode,
    /// Leave the error state (or abandon everything and return to idle).
    Reset,
}

/// Everything the controller reacts to.
#[derive(Debug)]
pub enum ControllerEvent {
    Capture(CaptureEvent),
    Transport(TransportEvent),
    Playback(PlaybackEvent),
    User(UserCommand),
    /// Pipeline teardown; the actor exits.
    Shutdown,
}
