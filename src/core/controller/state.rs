//! The pipeline's externally visible voice state.

/// Conversation state. Written only by the turn controller; everything else
/// observes it through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceState {
    /// Nothing in flight; the next speech opens a turn.
    Idle,
    /// A turn is open and streaming to the backend.
    Listening,
    /// The turn is closed; waiting on the backend's reply.
    Processing,
    /// Reply audio is playing.
    Speaking,
    /// A device or connection failure needs user remediation; leave via
    /// an explicit reset.
    Error(String),
}

impl VoiceState {
    pub fn is_error(&self) -> bool {
        matches!(self, VoiceState::Error(_))
    }
}

impl std::fmt::Display for VoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceState::Idle => f.write_str("idle"),
            VoiceState::Listening => f.write_str("listening"),
            VoiceState::Processing => f.write_str("processing"),
            VoiceState::Speaking => f.write_str("speaking"),
            VoiceState::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}
