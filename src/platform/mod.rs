//! Device-audio implementations of the platform capability seams.
//!
//! Compiled only with the `device-audio` feature: [`CpalMicrophone`] for
//! capture and [`RodioSinkProvider`] for playback.

pub mod cpal_source;
pub mod rodio_sink;

pub use cpal_source::CpalMicrophone;
pub use rodio_sink::RodioSinkProvider;
