//! Pipeline assembly: wires the capture, transport, playback, and
//! controller workers together and exposes the embedder-facing surface.
//!
//! Workers communicate through typed channels only; the controller's
//! mailbox is the single point where transitions serialize. The embedder
//! gets watch receivers for every observable and plain methods for user
//! commands.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::core::capture::{CaptureHandle, CaptureStreamer, MicrophoneSource};
use crate::core::controller::{
    ControllerEvent, ControllerHandle, TelemetryEvent, TurnController, VoiceState,
};
use crate::core::playback::{PlaybackQueue, SinkProvider};
use crate::core::transport::{
    ChannelConnector, ConnectionState, TransportClient, TransportHandle,
};
use crate::core::vad::EnergyVad;
use crate::errors::PipelineResult;

/// A running voice pipeline.
///
/// Dropping the pipeline without [`shutdown`](Self::shutdown) aborts
/// nothing: call shutdown for a deterministic release of the microphone,
/// the output device, and the connection.
pub struct VoicePipeline {
    controller: ControllerHandle,
    transport: TransportHandle,
    capture: CaptureHandle,
    playback: PlaybackQueue,
    audio_level: watch::Receiver<f32>,
    telemetry: Option<mpsc::UnboundedReceiver<TelemetryEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl VoicePipeline {
    /// Validate the configuration and start every worker.
    ///
    /// The platform seams are injected: a microphone source, an output
    /// sink provider, and a channel connector.
    pub fn spawn(
        config: PipelineConfig,
        source: Box<dyn MicrophoneSource>,
        sinks: Arc<dyn SinkProvider>,
        connector: Arc<dyn ChannelConnector>,
    ) -> PipelineResult<Self> {
        config.validate()?;

        let (transport, transport_task) = TransportClient::spawn(config.transport(), connector);

        let (playback_events_tx, mut playback_events_rx) = mpsc::unbounded_channel();
        let (playback, playback_task) = PlaybackQueue::spawn(sinks, playback_events_tx);

        let vad = EnergyVad::new(config.vad, source.frame_size());
        let (capture_events_tx, mut capture_events_rx) = mpsc::unbounded_channel();
        let (audio_level_tx, audio_level) = watch::channel(0.0f32);
        let (capture, capture_task) = CaptureStreamer::spawn(
            source,
            vad,
            config.capture,
            transport.clone(),
            capture_events_tx,
            audio_level_tx,
        );

        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel();
        let (controller, controller_task) = TurnController::spawn(
            config.controller,
            capture.clone(),
            transport.clone(),
            playback.clone(),
            telemetry_tx,
        );

        let mut tasks = vec![transport_task, playback_task, capture_task, controller_task];

        // Forward each worker's events into the controller mailbox.
        let ctrl = controller.clone();
        let mut transport_events = transport.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                match transport_events.recv().await {
                    Ok(event) => ctrl.send(ControllerEvent::Transport(event)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("controller missed {missed} transport events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("transport event forwarder exited");
        }));

        let ctrl = controller.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = capture_events_rx.recv().await {
                ctrl.send(ControllerEvent::Capture(event));
            }
            debug!("capture event forwarder exited");
        }));

        let ctrl = controller.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = playback_events_rx.recv().await {
                ctrl.send(ControllerEvent::Playback(event));
            }
            debug!("playback event forwarder exited");
        }));

        Ok(Self {
            controller,
            transport,
            capture,
            playback,
            audio_level,
            telemetry: Some(telemetry_rx),
            tasks,
        })
    }

    // ── Observables ────────────────────────────────────────────────────

    pub fn voice_state(&self) -> watch::Receiver<VoiceState> {
        self.controller.voice_state()
    }

    /// Smoothed 0-1 energy for visualization.
    pub fn audio_level(&self) -> watch::Receiver<f32> {
        self.audio_level.clone()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.connection_state()
    }

    pub fn transcript(&self) -> watch::Receiver<String> {
        self.controller.transcript()
    }

    pub fn reply_text(&self) -> watch::Receiver<String> {
        self.controller.reply_text()
    }

    pub fn queue_depth(&self) -> watch::Receiver<usize> {
        self.playback.queue_depth()
    }

    /// The telemetry stream, once. Subsequent calls return `None`.
    pub fn take_telemetry(&mut self) -> Option<mpsc::UnboundedReceiver<TelemetryEvent>> {
        self.telemetry.take()
    }

    // ── User commands ──────────────────────────────────────────────────

    pub fn manual_start(&self) {
        self.controller.manual_start();
    }

    pub fn manual_stop(&self) {
        self.controller.manual_stop();
    }

    pub fn toggle_auto_mode(&self) {
        self.controller.toggle_auto_mode();
    }

    /// Leave the error state once the underlying condition is resolved.
    pub fn reset(&self) {
        self.controller.reset();
    }

    /// Manual retry after the transport gave up.
    pub fn retry_connection(&self) {
        self.transport.reconnect();
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Stop capture and playback, close the connection normally, and wait
    /// for every worker to exit.
    pub async fn shutdown(self) {
        let VoicePipeline {
            controller,
            transport,
            capture,
            playback,
            tasks,
            ..
        } = self;

        capture.shutdown();
        playback.shutdown();
        transport.disconnect();
        controller.send(ControllerEvent::Shutdown);

        // Handles must go first: workers and forwarders only observe closed
        // channels once every sender is gone.
        drop(capture);
        drop(playback);
        drop(controller);
        drop(transport);

        for task in tasks {
            let _ = task.await;
        }
        debug!("pipeline shut down");
    }
}

#[cfg(feature = "device-audio")]
impl VoicePipeline {
    /// Spawn against the real microphone, speaker, and a WebSocket
    /// connection to the configured endpoint.
    pub fn spawn_with_devices(config: PipelineConfig) -> PipelineResult<Self> {
        use crate::core::transport::WsConnector;
        use crate::platform::{CpalMicrophone, RodioSinkProvider};

        let source = CpalMicrophone::open(config.sample_rate, config.frame_samples())?;
        Self::spawn(
            config,
            Box::new(source),
            Arc::new(RodioSinkProvider),
            Arc::new(WsConnector),
        )
    }
}
