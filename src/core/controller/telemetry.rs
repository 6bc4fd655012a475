//! Turn and latency telemetry for an external metrics collector.

/// Emitted by the controller as turns progress. The pipeline does not
/// record these itself; a collector subscribes and persists what it wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    TurnOpened {
        turn_id: u64,
    },
    /// Capture closed; the backend is processing.
    TurnClosed {
        turn_id: u64,
        capture_ms: u64,
    },
    /// First reply text after processing began.
    FirstToken {
        turn_id: u64,
        latency_ms: u64,
    },
    /// First synthesized audio after processing began.
    FirstAudio {
        turn_id: u64,
        latency_ms: u64,
    },
    TurnCompleted {
        turn_id: u64,
        total_ms: u64,
    },
    /// The turn ended without a reply (barge-in, disconnect, error).
    TurnAbandoned {
        turn_id: u64,
        reason: String,
    },
    /// The processing watchdog fired.
    ProcessingTimeout {
        turn_id: u64,
    },
}
