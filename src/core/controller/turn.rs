//! Per-turn bookkeeping.

use std::time::Instant;

/// Why a turn's capture ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEndReason {
    /// The detector saw sustained silence.
    Silence,
    /// The user stopped it explicitly.
    Forced,
    /// Barge-in, error, or timeout abandoned it.
    Cancelled,
}

/// One user utterance, from speech-start to its resolved end.
#[derive(Debug)]
pub struct Turn {
    pub id: u64,
    pub opened_at: Instant,
    /// When capture closed and the backend took over.
    pub processing_at: Option<Instant>,
    /// First reply text for latency accounting.
    pub first_token_at: Option<Instant>,
    /// First synthesized audio for latency accounting.
    pub first_audio_at: Option<Instant>,
    /// The backend said the reply is complete.
    pub reply_end_received: bool,
    pub end_reason: Option<TurnEndReason>,
}

impl Turn {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            opened_at: Instant::now(),
            processing_at: None,
            first_token_at: None,
            first_audio_at: None,
            reply_end_received: false,
            end_reason: None,
        }
    }

    /// Milliseconds since processing began, if it has.
    pub fn processing_elapsed_ms(&self) -> Option<u64> {
        self.processing_at
            .map(|start| start.elapsed().as_millis() as u64)
    }

    pub fn total_ms(&self) -> u64 {
        self.opened_at.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_turn_has_no_latency_marks() {
        let turn = Turn::new(1);
        assert_eq!(turn.id, 1);
        assert!(turn.processing_at.is_none());
        assert!(turn.first_token_at.is_none());
        assert!(turn.first_audio_at.is_none());
        assert!(!turn.reply_end_received);
        assert_eq!(turn.processing_elapsed_ms(), None);
    }
}
