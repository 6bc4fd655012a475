//! Turn-taking orchestration: the voice state machine, turn bookkeeping,
//! and telemetry.

pub mod controller;
pub mod events;
pub mod state;
pub mod telemetry;
pub mod turn;

pub use controller::{ControllerConfig, ControllerHandle, TurnController};
pub use events::{ControllerEvent, UserCommand};
pub use state::VoiceState;
pub use telemetry::TelemetryEvent;
pub use turn::{Turn, TurnEndReason};
