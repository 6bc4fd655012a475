//! Microphone capture through cpal.
//!
//! The cpal stream is not `Send`, so it lives on a dedicated thread that
//! only keeps it alive; the audio callback itself forwards fixed-size
//! frames into a channel the async side reads from. Dropping the source
//! ends the thread and releases the device.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::{pcm, AudioFrame};
use crate::core::capture::{CaptureError, MicrophoneSource};

/// The default input device as a frame source.
pub struct CpalMicrophone {
    sample_rate: u32,
    frame_samples: usize,
    frames: mpsc::UnboundedReceiver<Vec<i16>>,
    /// Dropping this ends the stream thread.
    _stop: std_mpsc::Sender<()>,
    next_seq: u64,
}

impl CpalMicrophone {
    /// Open the default input device for mono capture.
    pub fn open(sample_rate: u32, frame_samples: usize) -> Result<Self, CaptureError> {
        let (frame_tx, frames) = mpsc::unbounded_channel::<Vec<i16>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();

        thread::Builder::new()
            .name("parla-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(sample_rate, frame_samples, frame_tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Keep the stream alive until the source is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| CaptureError::Stream(format!("capture thread failed: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("microphone open: {sample_rate} Hz, {frame_samples} samples/frame");
                Ok(Self {
                    sample_rate,
                    frame_samples,
                    frames,
                    _stop: stop_tx,
                    next_seq: 0,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::DeviceUnavailable(
                "capture thread ended before the device opened".to_string(),
            )),
        }
    }
}

fn build_stream(
    sample_rate: u32,
    frame_samples: usize,
    frame_tx: mpsc::UnboundedSender<Vec<i16>>,
) -> Result<cpal::Stream, CaptureError> {
    let device = cpal::default_host().default_input_device().ok_or_else(|| {
        CaptureError::DeviceUnavailable("no input device available".to_string())
    })?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    info!("using input device: {name}");

    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut pending: Vec<f32> = Vec::with_capacity(frame_samples);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push(sample);
                    if pending.len() >= frame_samples {
                        let frame = pcm::f32_to_i16(&pending);
                        pending.clear();
                        if frame_tx.send(frame).is_err() {
                            // Receiver gone; the stream is about to stop.
                            return;
                        }
                    }
                }
            },
            move |err| warn!("capture stream error: {err}"),
            None,
        )
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
    stream
        .play()
        .map_err(|e| CaptureError::Stream(e.to_string()))?;
    Ok(stream)
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.frame_samples
    }

    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, CaptureError> {
        match self.frames.recv().await {
            Some(samples) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                Ok(Some(AudioFrame::new(samples, seq, self.sample_rate)))
            }
            None => Ok(None),
        }
    }
}
