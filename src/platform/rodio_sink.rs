//! Speaker playback through rodio.
//!
//! Rodio's output stream is not `Send`, so each acquired sink runs a
//! dedicated thread owning the device; the async side talks to it over a
//! channel. `halt` maps to `rodio::Sink::stop`, the interruption
//! kill-switch. Dropping the sink ends the thread and releases the device.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::core::playback::{AudioSink, PlaybackError, SinkProvider};

enum SinkCommand {
    Play {
        audio: Vec<u8>,
        done: oneshot::Sender<Result<(), PlaybackError>>,
    },
    Halt,
}

/// Acquires the default output device.
pub struct RodioSinkProvider;

impl SinkProvider for RodioSinkProvider {
    fn acquire(&self) -> Result<Box<dyn AudioSink>, PlaybackError> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<SinkCommand>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), PlaybackError>>();

        thread::Builder::new()
            .name("parla-playback".to_string())
            .spawn(move || run_device_thread(cmd_rx, ready_tx))
            .map_err(|e| PlaybackError::DeviceUnavailable(format!("playback thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("output device acquired");
                Ok(Box::new(RodioSink {
                    cmd_tx: Mutex::new(cmd_tx),
                }))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PlaybackError::DeviceUnavailable(
                "playback thread ended before the device opened".to_string(),
            )),
        }
    }
}

fn run_device_thread(
    cmd_rx: std_mpsc::Receiver<SinkCommand>,
    ready_tx: std_mpsc::Sender<Result<(), PlaybackError>>,
) {
    let stream = match rodio::OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(PlaybackError::DeviceUnavailable(e.to_string())));
            return;
        }
    };
    let (_stream, handle) = stream;
    let sink = match rodio::Sink::try_new(&handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready_tx.send(Err(PlaybackError::DeviceUnavailable(e.to_string())));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    while let Ok(command) = cmd_rx.recv() {
        match command {
            SinkCommand::Halt => {}
            SinkCommand::Play { audio, done } => {
                let source = match rodio::Decoder::new(Cursor::new(audio)) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = done.send(Err(PlaybackError::Decode(e.to_string())));
                        continue;
                    }
                };
                use rodio::Source;
                sink.append(source.convert_samples::<f32>());

                // Wait for completion while staying responsive to Halt.
                let result = loop {
                    if sink.empty() {
                        break Ok(());
                    }
                    match cmd_rx.recv_timeout(Duration::from_millis(20)) {
                        Ok(SinkCommand::Halt) => {
                            sink.stop();
                            debug!("playback halted");
                            break Ok(());
                        }
                        Ok(SinkCommand::Play { done, .. }) => {
                            // One item renders at a time; refuse overlap.
                            warn!("play requested while another item renders");
                            let _ = done.send(Err(PlaybackError::Output(
                                "sink is busy".to_string(),
                            )));
                        }
                        Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                        Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                            sink.stop();
                            break Ok(());
                        }
                    }
                };
                let _ = done.send(result);
            }
        }
    }
    debug!("output device released");
}

/// Handle to the device thread.
pub struct RodioSink {
    cmd_tx: Mutex<std_mpsc::Sender<SinkCommand>>,
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn play(&self, audio: &Bytes, _mime: &str) -> Result<(), PlaybackError> {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let tx = self.cmd_tx.lock();
            tx.send(SinkCommand::Play {
                audio: audio.to_vec(),
                done: done_tx,
            })
            .map_err(|_| PlaybackError::Output("playback thread is gone".to_string()))?;
        }
        done_rx
            .await
            .map_err(|_| PlaybackError::Output("playback thread is gone".to_string()))?
    }

    fn halt(&self) {
        let tx = self.cmd_tx.lock();
        let _ = tx.send(SinkCommand::Halt);
    }
}
