//! Capture worker: reads microphone frames, runs the VAD, and streams
//! chunked audio for the open turn.
//!
//! The worker is the only owner of the microphone and the detector. Turn
//! boundaries are decided elsewhere; this worker reacts to open/close
//! commands and otherwise just pumps frames.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::source::{CaptureError, MicrophoneSource};
use crate::audio::pcm;
use crate::core::transport::{OutboundMessage, TransportHandle};
use crate::core::vad::{EnergyVad, VadEvent};

/// How a closing turn's buffered audio is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnClose {
    /// Flush the partial chunk and send `audio_end`.
    Commit,
    /// Drop buffered audio without notifying the backend (barge-in or
    /// abandoned turn; any stop signal is sent by the caller).
    Discard,
}

/// Commands from the turn controller.
#[derive(Debug)]
pub enum CaptureCommand {
    OpenTurn { turn_id: u64 },
    CloseTurn { mode: TurnClose },
    Shutdown,
}

/// Events published to the turn controller.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Vad(VadEvent),
    /// The device failed; the session needs user remediation.
    Error(CaptureError),
    /// The source ran out of frames.
    Ended,
}

/// Chunking configuration.
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Duration of one transport chunk (ms of audio per send).
    pub chunk_duration_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: 240,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_duration_ms == 0 {
            return Err("chunk_duration_ms must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Cloneable handle to the capture worker.
#[derive(Clone)]
pub struct CaptureHandle {
    cmd_tx: mpsc::UnboundedSender<CaptureCommand>,
}

impl CaptureHandle {
    pub fn open_turn(&self, turn_id: u64) {
        let _ = self.cmd_tx.send(CaptureCommand::OpenTurn { turn_id });
    }

    pub fn close_turn(&self, mode: TurnClose) {
        let _ = self.cmd_tx.send(CaptureCommand::CloseTurn { mode });
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(CaptureCommand::Shutdown);
    }
}

/// Spawns the capture worker.
pub struct CaptureStreamer;

impl CaptureStreamer {
    pub fn spawn(
        source: Box<dyn MicrophoneSource>,
        vad: EnergyVad,
        config: CaptureConfig,
        transport: TransportHandle,
        events: mpsc::UnboundedSender<CaptureEvent>,
        audio_level: watch::Sender<f32>,
    ) -> (CaptureHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let chunk_samples =
            (source.sample_rate() as u64 * config.chunk_duration_ms / 1000).max(1) as usize;
        let worker = Worker {
            source,
            vad,
            transport,
            events,
            audio_level,
            chunk_samples,
            open: None,
        };
        let join = tokio::spawn(worker.run(cmd_rx));
        (CaptureHandle { cmd_tx }, join)
    }
}

/// An open turn's streaming state.
struct OpenTurn {
    turn_id: u64,
    next_seq: u32,
    buffer: Vec<i16>,
}

struct Worker {
    source: Box<dyn MicrophoneSource>,
    vad: EnergyVad,
    transport: TransportHandle,
    events: mpsc::UnboundedSender<CaptureEvent>,
    audio_level: watch::Sender<f32>,
    chunk_samples: usize,
    open: Option<OpenTurn>,
}

impl Worker {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<CaptureCommand>) {
        info!(
            "capture started: {} Hz, {} samples/frame, {} samples/chunk",
            self.source.sample_rate(),
            self.source.frame_size(),
            self.chunk_samples
        );
        loop {
            // Commands are rare and ordering-sensitive (a turn must open
            // before its frames buffer), so they win over queued frames.
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(CaptureCommand::Shutdown) => break,
                    Some(CaptureCommand::OpenTurn { turn_id }) => self.open_turn(turn_id),
                    Some(CaptureCommand::CloseTurn { mode }) => self.close_turn(mode),
                },
                frame = self.source.next_frame() => match frame {
                    Ok(Some(frame)) => self.on_frame(frame),
                    Ok(None) => {
                        debug!("capture stream ended");
                        let _ = self.events.send(CaptureEvent::Ended);
                        break;
                    }
                    Err(e) => {
                        warn!("capture failed: {e}");
                        let _ = self.events.send(CaptureEvent::Error(e));
                        break;
                    }
                },
            }
        }
        // Dropping the source releases the device on every exit path.
        debug!("capture worker exited");
    }

    fn open_turn(&mut self, turn_id: u64) {
        if let Some(turn) = &self.open {
            warn!(
                "turn {turn_id} opened while {} still streaming; discarding it",
                turn.turn_id
            );
            self.open = None;
        }
        debug!("turn {turn_id} capture open");
        self.open = Some(OpenTurn {
            turn_id,
            next_seq: 0,
            buffer: Vec::with_capacity(self.chunk_samples),
        });
    }

    fn close_turn(&mut self, mode: TurnClose) {
        let Some(mut turn) = self.open.take() else {
            return;
        };
        match mode {
            TurnClose::Commit => {
                // Flush the trailing partial chunk so nothing is lost, then
                // mark the turn complete. Both ride the same ordered queue.
                if !turn.buffer.is_empty() {
                    let chunk = pcm::samples_to_bytes(&turn.buffer);
                    self.transport.send_chunk(turn.turn_id, turn.next_seq, chunk);
                    turn.next_seq += 1;
                }
                self.transport.send(OutboundMessage::AudioEnd {
                    turn_id: turn.turn_id,
                });
                debug!(
                    "turn {} capture committed ({} chunks)",
                    turn.turn_id, turn.next_seq
                );
            }
            TurnClose::Discard => {
                debug!("turn {} capture discarded", turn.turn_id);
            }
        }
        // Clean hysteresis for the next turn.
        self.vad.reset();
    }

    fn on_frame(&mut self, frame: crate::audio::AudioFrame) {
        if let Some(event) = self.vad.process(&frame) {
            let _ = self.events.send(CaptureEvent::Vad(event));
        }
        let _ = self.audio_level.send(self.vad.audio_level());

        if let Some(turn) = self.open.as_mut() {
            turn.buffer.extend_from_slice(&frame.samples);
            while turn.buffer.len() >= self.chunk_samples {
                let rest = turn.buffer.split_off(self.chunk_samples);
                let chunk = pcm::samples_to_bytes(&turn.buffer);
                turn.buffer = rest;
                self.transport.send_chunk(turn.turn_id, turn.next_seq, chunk);
                turn.next_seq += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunk_duration_is_sane() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        // ~200-250ms of audio per transport send.
        assert_eq!(config.chunk_duration_ms, 240);
    }

    #[test]
    fn zero_chunk_duration_rejected() {
        let config = CaptureConfig {
            chunk_duration_ms: 0,
        };
        assert!(config.validate().is_err());
    }
}
