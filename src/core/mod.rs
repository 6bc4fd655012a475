//! The voice pipeline core: detection, capture, transport, playback, and
//! the turn controller that orchestrates them.

pub mod capture;
pub mod controller;
pub mod playback;
pub mod transport;
pub mod vad;
