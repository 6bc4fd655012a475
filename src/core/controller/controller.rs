//! The turn-taking state machine.
//!
//! A single-consumer mailbox serializes every input — VAD boundaries,
//! transport events, playback notifications, user commands — so exactly one
//! transition applies at a time and the controller stays the sole writer of
//! [`VoiceState`]. Inbound backend events are checked against the active
//! turn id; stale ones are discarded.
//!
//! Transitions:
//!
//! ```text
//! Idle ── speech start ──► Listening ── silence end / manual stop ──► Processing
//! Processing ── first audio segment ──► Speaking
//! Processing ── reply end (text only) ──► Idle
//! Speaking ── queue drained after reply end ──► Idle
//! Speaking ── speech start (barge-in) ──► Listening   (stop playback, stop signal, new turn)
//! any ── capture failure / reconnects exhausted ──► Error ── reset ──► Idle
//! ```
//!
//! Processing carries a watchdog so a stalled backend cannot wedge the
//! pipeline; on expiry the turn is discarded and the state forced to Idle.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{ControllerEvent, UserCommand};
use super::state::VoiceState;
use super::telemetry::TelemetryEvent;
use super::turn::{Turn, TurnEndReason};
use crate::core::capture::{CaptureEvent, CaptureHandle, TurnClose};
use crate::core::playback::{PlaybackEvent, PlaybackQueue, PlaylistItem};
use crate::core::transport::{
    InboundMessage, OutboundMessage, TransportEvent, TransportHandle,
};
use crate::core::vad::VadEvent;

/// Controller tuning.
#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// Watchdog on the Processing state; on expiry the turn is discarded.
    pub processing_timeout: Duration,
    /// Whether detected speech opens turns without a user action.
    pub auto_mode: bool,
    /// Whether detected speech may interrupt an in-progress reply.
    pub allow_barge_in: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::from_secs(10),
            auto_mode: true,
            allow_barge_in: true,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.processing_timeout.is_zero() {
            return Err("processing_timeout must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Cloneable handle: event intake plus the observable outputs.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
    voice_state: watch::Receiver<VoiceState>,
    transcript: watch::Receiver<String>,
    reply_text: watch::Receiver<String>,
}

impl ControllerHandle {
    /// Deliver an event to the mailbox. Used by the worker forwarders.
    pub fn send(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    pub fn user(&self, command: UserCommand) {
        self.send(ControllerEvent::User(command));
    }

    pub fn manual_start(&self) {
        self.user(UserCommand::ManualStart);
    }

    pub fn manual_stop(&self) {
        self.user(UserCommand::ManualStop);
    }

    pub fn toggle_auto_mode(&self) {
        self.user(UserCommand::ToggleAutoMode);
    }

    pub fn reset(&self) {
        self.user(UserCommand::Reset);
    }

    pub fn voice_state(&self) -> watch::Receiver<VoiceState> {
        self.voice_state.clone()
    }

    pub fn transcript(&self) -> watch::Receiver<String> {
        self.transcript.clone()
    }

    pub fn reply_text(&self) -> watch::Receiver<String> {
        self.reply_text.clone()
    }
}

/// Spawns the controller actor.
pub struct TurnController;

impl TurnController {
    pub fn spawn(
        config: ControllerConfig,
        capture: CaptureHandle,
        transport: TransportHandle,
        playback: PlaybackQueue,
        telemetry: mpsc::UnboundedSender<TelemetryEvent>,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(VoiceState::Idle);
        let (transcript_tx, transcript_rx) = watch::channel(String::new());
        let (reply_tx, reply_rx) = watch::channel(String::new());

        let handle = ControllerHandle {
            events: event_tx,
            voice_state: state_rx,
            transcript: transcript_rx,
            reply_text: reply_rx,
        };
        let actor = Actor {
            auto_mode: config.auto_mode,
            config,
            capture,
            transport,
            playback,
            telemetry,
            state: VoiceState::Idle,
            state_tx,
            transcript_tx,
            reply_tx,
            turn: None,
            next_turn_id: 1,
            deadline: None,
            transport_up: false,
            audio_drained: true,
        };
        let join = tokio::spawn(actor.run(event_rx));
        (handle, join)
    }
}

struct Actor {
    config: ControllerConfig,
    capture: CaptureHandle,
    transport: TransportHandle,
    playback: PlaybackQueue,
    telemetry: mpsc::UnboundedSender<TelemetryEvent>,

    state: VoiceState,
    state_tx: watch::Sender<VoiceState>,
    transcript_tx: watch::Sender<String>,
    reply_tx: watch::Sender<String>,

    turn: Option<Turn>,
    next_turn_id: u64,
    /// Processing watchdog deadline, set only while Processing.
    deadline: Option<tokio::time::Instant>,
    auto_mode: bool,
    transport_up: bool,
    /// No reply audio is queued or playing.
    audio_drained: bool,
}

impl Actor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControllerEvent>) {
        loop {
            let event = match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        ev = events.recv() => ev,
                        _ = tokio::time::sleep_until(deadline) => {
                            self.on_watchdog();
                            continue;
                        }
                    }
                }
                None => events.recv().await,
            };
            let Some(event) = event else { break };
            if matches!(event, ControllerEvent::Shutdown) {
                break;
            }
            self.handle(event);
        }
        debug!("turn controller exited");
    }

    fn handle(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Shutdown => {}
            ControllerEvent::Capture(CaptureEvent::Vad(v)) => self.on_vad(v),
            ControllerEvent::Capture(CaptureEvent::Error(e)) => {
                self.enter_error(format!("capture: {e}"));
            }
            ControllerEvent::Capture(CaptureEvent::Ended) => {
                warn!("microphone stream ended");
                self.abandon_active_turn("capture ended");
            }
            ControllerEvent::Transport(ev) => self.on_transport(ev),
            ControllerEvent::Playback(ev) => self.on_playback(ev),
            ControllerEvent::User(cmd) => self.on_user(cmd),
        }
    }

    // ── VAD ────────────────────────────────────────────────────────────

    fn on_vad(&mut self, event: VadEvent) {
        match event {
            VadEvent::SilenceDetected | VadEvent::SpeechResumed => {
                debug!("vad: {event:?}");
            }
            VadEvent::SpeechStart => match self.state {
                VoiceState::Idle if self.auto_mode => self.open_turn(),
                VoiceState::Idle => debug!("speech ignored: auto mode off"),
                VoiceState::Speaking if self.auto_mode && self.config.allow_barge_in => {
                    self.barge_in();
                }
                VoiceState::Speaking => debug!("speech during reply ignored"),
                VoiceState::Listening => {}
                VoiceState::Processing => debug!("speech during processing ignored"),
                VoiceState::Error(_) => {}
            },
            VadEvent::SilenceEnd => match self.state {
                VoiceState::Listening => self.close_turn(TurnEndReason::Silence),
                _ => debug!("silence end ignored in state {}", self.state),
            },
        }
    }

    // ── Turn lifecycle ─────────────────────────────────────────────────

    fn open_turn(&mut self) {
        let id = self.next_turn_id;
        self.next_turn_id += 1;
        self.turn = Some(Turn::new(id));
        self.capture.open_turn(id);
        let _ = self.transcript_tx.send(String::new());
        let _ = self.reply_tx.send(String::new());
        self.emit(TelemetryEvent::TurnOpened { turn_id: id });
        info!("turn {id} opened");
        self.set_state(VoiceState::Listening);
    }

    fn close_turn(&mut self, reason: TurnEndReason) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        turn.end_reason = Some(reason);
        turn.processing_at = Some(Instant::now());
        let capture_ms = turn.opened_at.elapsed().as_millis() as u64;
        let turn_id = turn.id;

        // Flushes the partial chunk and sends audio_end, in order.
        self.capture.close_turn(TurnClose::Commit);
        self.deadline = Some(tokio::time::Instant::now() + self.config.processing_timeout);
        self.emit(TelemetryEvent::TurnClosed {
            turn_id,
            capture_ms,
        });
        info!("turn {turn_id} closed ({reason:?}), awaiting reply");
        self.set_state(VoiceState::Processing);
    }

    /// Speech while a reply plays: kill playback, tell the backend to stop,
    /// and open a fresh turn before any of its audio is captured.
    fn barge_in(&mut self) {
        if let Some(mut turn) = self.turn.take() {
            turn.end_reason = Some(TurnEndReason::Cancelled);
            info!("barge-in: interrupting reply for turn {}", turn.id);
            self.emit(TelemetryEvent::TurnAbandoned {
                turn_id: turn.id,
                reason: "barge-in".to_string(),
            });
        }
        self.playback.stop_all();
        self.audio_drained = true;
        self.transport.send(OutboundMessage::Stop {
            reason: "barge-in".to_string(),
        });
        self.deadline = None;
        self.open_turn();
    }

    fn complete_turn(&mut self) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        self.deadline = None;
        self.emit(TelemetryEvent::TurnCompleted {
            turn_id: turn.id,
            total_ms: turn.total_ms(),
        });
        info!("turn {} completed in {}ms", turn.id, turn.total_ms());
        self.set_state(VoiceState::Idle);
    }

    /// Drop the active turn (if any) and return to Idle. Used for protocol
    /// errors, link loss mid-turn, backend errors, and resets.
    fn abandon_active_turn(&mut self, reason: &str) {
        if self.state.is_error() {
            return;
        }
        if let Some(mut turn) = self.turn.take() {
            turn.end_reason = Some(TurnEndReason::Cancelled);
            warn!("turn {} abandoned: {reason}", turn.id);
            if self.state == VoiceState::Listening {
                self.capture.close_turn(TurnClose::Discard);
            }
            self.emit(TelemetryEvent::TurnAbandoned {
                turn_id: turn.id,
                reason: reason.to_string(),
            });
        }
        if self.state == VoiceState::Speaking {
            self.playback.stop_all();
            self.audio_drained = true;
        }
        self.deadline = None;
        if self.state != VoiceState::Idle {
            self.set_state(VoiceState::Idle);
        }
    }

    fn on_watchdog(&mut self) {
        self.deadline = None;
        if self.state != VoiceState::Processing {
            return;
        }
        let Some(turn) = self.turn.take() else {
            self.set_state(VoiceState::Idle);
            return;
        };
        warn!(
            "no reply for turn {} within {:?}; discarding it",
            turn.id, self.config.processing_timeout
        );
        self.emit(TelemetryEvent::ProcessingTimeout { turn_id: turn.id });
        self.transport.send(OutboundMessage::Stop {
            reason: "timeout".to_string(),
        });
        self.set_state(VoiceState::Idle);
    }

    // ── Transport ──────────────────────────────────────────────────────

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.transport_up = true;
            }
            TransportEvent::Disconnected { reason } => {
                self.transport_up = false;
                self.on_link_lost(&reason);
            }
            TransportEvent::Reconnecting { attempt, .. } => {
                self.transport_up = false;
                debug!("transport reconnecting (attempt {attempt})");
            }
            TransportEvent::Failed => {
                self.transport_up = false;
                self.enter_error("connection failed after repeated attempts".to_string());
            }
            TransportEvent::ChunkDropped { turn_id } => {
                if self.is_current(turn_id) {
                    self.abandon_active_turn("transport dropped turn audio");
                }
            }
            TransportEvent::ProtocolError { detail } => {
                warn!("protocol error: {detail}");
                self.abandon_active_turn("protocol error");
            }
            TransportEvent::Inbound(message) => self.on_inbound(message),
        }
    }

    /// A turn in flight cannot survive the link dropping; it is abandoned
    /// rather than silently resumed on the next connection.
    fn on_link_lost(&mut self, reason: &str) {
        match self.state {
            VoiceState::Listening | VoiceState::Processing => {
                self.abandon_active_turn(&format!("disconnected: {reason}"));
            }
            VoiceState::Speaking => {
                // Whatever audio is queued locally finishes, but no reply
                // end will arrive; treat it as received so the drain
                // returns to Idle.
                if let Some(turn) = self.turn.as_mut() {
                    turn.reply_end_received = true;
                }
            }
            _ => {}
        }
    }

    fn on_inbound(&mut self, message: InboundMessage) {
        if let Some(turn_id) = message.turn_id() {
            if !self.is_current(turn_id) {
                debug!("discarding stale event for turn {turn_id}: {message:?}");
                return;
            }
        }
        match message {
            InboundMessage::Ready => {}
            InboundMessage::Error { message } => {
                warn!("backend error: {message}");
                self.abandon_active_turn("backend error");
            }
            InboundMessage::TranscriptPartial { text, .. } => {
                let _ = self.transcript_tx.send(text);
            }
            InboundMessage::TranscriptFinal { text, .. } => {
                let _ = self.transcript_tx.send(text);
            }
            InboundMessage::ReplyText { text, .. } => self.on_reply_text(text),
            InboundMessage::AudioSegment {
                mime, audio, seq, ..
            } => self.on_audio_segment(mime, audio, seq),
            InboundMessage::ReplyEnd { .. } => self.on_reply_end(),
        }
    }

    fn on_reply_text(&mut self, text: String) {
        let _ = self.reply_tx.send(text);
        let mut first_token = None;
        if let Some(turn) = self.turn.as_mut() {
            if turn.first_token_at.is_none() {
                turn.first_token_at = Some(Instant::now());
                if let Some(latency_ms) = turn.processing_elapsed_ms() {
                    first_token = Some((turn.id, latency_ms));
                }
            }
        }
        if let Some((turn_id, latency_ms)) = first_token {
            self.emit(TelemetryEvent::FirstToken {
                turn_id,
                latency_ms,
            });
        }
    }

    fn on_audio_segment(&mut self, mime: String, audio: bytes::Bytes, seq: u32) {
        match self.state {
            VoiceState::Processing => {
                let mut first_audio = None;
                if let Some(turn) = self.turn.as_mut() {
                    turn.first_audio_at = Some(Instant::now());
                    if let Some(latency_ms) = turn.processing_elapsed_ms() {
                        first_audio = Some((turn.id, latency_ms));
                    }
                }
                if let Some((turn_id, latency_ms)) = first_audio {
                    self.emit(TelemetryEvent::FirstAudio {
                        turn_id,
                        latency_ms,
                    });
                }
                // The reply has audio; the watchdog's job is done.
                self.deadline = None;
                self.playback.enqueue(PlaylistItem::new(audio, mime));
                self.audio_drained = false;
                self.set_state(VoiceState::Speaking);
            }
            VoiceState::Speaking => {
                self.playback.enqueue(PlaylistItem::new(audio, mime));
                self.audio_drained = false;
            }
            _ => debug!(
                "audio segment {seq} ignored in state {}",
                self.state
            ),
        }
    }

    fn on_reply_end(&mut self) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        turn.reply_end_received = true;
        match self.state {
            // Text-only reply: nothing to play.
            VoiceState::Processing => self.complete_turn(),
            VoiceState::Speaking if self.audio_drained => self.complete_turn(),
            _ => {}
        }
    }

    // ── Playback ───────────────────────────────────────────────────────

    fn on_playback(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started { label } => debug!("playing {label}"),
            PlaybackEvent::Finished { label } => debug!("finished {label}"),
            PlaybackEvent::Failed { label, error } => {
                // Per-item failure; the queue has already moved on.
                warn!("playback of {label} failed: {error}");
            }
            PlaybackEvent::Drained => {
                self.audio_drained = true;
                if self.state == VoiceState::Speaking {
                    let reply_done = self
                        .turn
                        .as_ref()
                        .map(|t| t.reply_end_received)
                        .unwrap_or(true);
                    if reply_done {
                        self.complete_turn();
                    }
                }
            }
            PlaybackEvent::Stopped => debug!("playback stopped"),
        }
    }

    // ── User commands ──────────────────────────────────────────────────

    fn on_user(&mut self, command: UserCommand) {
        match command {
            UserCommand::ManualStart => match self.state {
                VoiceState::Idle => self.open_turn(),
                VoiceState::Speaking => self.barge_in(),
                _ => debug!("manual start ignored in state {}", self.state),
            },
            UserCommand::ManualStop => match self.state {
                VoiceState::Listening => self.close_turn(TurnEndReason::Forced),
                _ => debug!("manual stop ignored in state {}", self.state),
            },
            UserCommand::ToggleAutoMode => {
                self.auto_mode = !self.auto_mode;
                info!(
                    "auto mode {}",
                    if self.auto_mode { "enabled" } else { "disabled" }
                );
            }
            UserCommand::Reset => {
                if self.state.is_error() {
                    info!("leaving error state");
                    self.deadline = None;
                    self.turn = None;
                    self.set_state(VoiceState::Idle);
                } else {
                    if self.turn.is_some() {
                        self.transport.send(OutboundMessage::Stop {
                            reason: "reset".to_string(),
                        });
                    }
                    self.playback.stop_all();
                    self.audio_drained = true;
                    self.abandon_active_turn("reset");
                }
            }
        }
    }

    // ── Error state ────────────────────────────────────────────────────

    fn enter_error(&mut self, reason: String) {
        if self.state.is_error() {
            return;
        }
        warn!("entering error state: {reason}");
        if self.state == VoiceState::Listening {
            self.capture.close_turn(TurnClose::Discard);
        }
        self.playback.stop_all();
        self.audio_drained = true;
        if let Some(turn) = self.turn.take() {
            self.emit(TelemetryEvent::TurnAbandoned {
                turn_id: turn.id,
                reason: reason.clone(),
            });
        }
        self.deadline = None;
        self.set_state(VoiceState::Error(reason));
    }

    // ── Helpers ────────────────────────────────────────────────────────

    fn is_current(&self, turn_id: u64) -> bool {
        self.turn.as_ref().map(|t| t.id == turn_id).unwrap_or(false)
    }

    fn set_state(&mut self, next: VoiceState) {
        if self.state == next {
            return;
        }
        info!("voice state {} -> {}", self.state, next);
        self.state = next.clone();
        let _ = self.state_tx.send(next);
    }

    fn emit(&self, event: TelemetryEvent) {
        // No collector attached is fine.
        let _ = self.telemetry.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processing_timeout, Duration::from_secs(10));
        assert!(config.auto_mode);
        assert!(config.allow_barge_in);
    }

    #[test]
    fn zero_watchdog_rejected() {
        let config = ControllerConfig {
            processing_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
