//! Audio primitives shared across the pipeline: PCM frames and
//! sample/byte conversions.

pub mod frame;
pub mod pcm;

pub use frame::AudioFrame;
