//! Priority-ordered, interruptible playback of synthesized audio.

pub mod item;
pub mod queue;
pub mod sink;

pub use item::{DisposeFn, PlaylistItem};
pub use queue::{PlaybackCommand, PlaybackEvent, PlaybackQueue};
pub use sink::{AudioSink, PlaybackError, SinkProvider};
