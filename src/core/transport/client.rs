//! Resilient transport client: one worker owning the channel, with
//! reconnect/backoff, a connect handshake, and fan-out of inbound events.
//!
//! # Architecture
//!
//! - Bounded channel for outbound messages: audio sends never block the
//!   capture loop; when the worker cannot keep up or the link is down,
//!   chunks are dropped and reported, never buffered indefinitely.
//! - Unbounded control channel for reconnect/shutdown so lifecycle commands
//!   cannot be crowded out by audio.
//! - Inbound events fan out on a broadcast channel; connection state is a
//!   watch value written only here.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use url::Url;

use super::backoff::{Backoff, BackoffConfig};
use super::channel::{ChannelConnector, ChannelMessage, ChannelSink, ChannelStream};
use super::messages::{
    encode_chunk, ConnectionState, InboundMessage, OutboundMessage, TransportEvent,
};

/// Transport failures, recoverable and otherwise.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Immutable per-session transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: Url,
    /// Session identifier carried in the connect handshake.
    pub session_id: String,
    /// Capture sample rate advertised to the backend.
    pub sample_rate: u32,
    /// Audio encoding advertised to the backend.
    pub encoding: String,
    /// Bound on connect plus handshake completion.
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
    /// Capacity of the outbound message queue.
    pub send_queue: usize,
}

impl TransportConfig {
    pub fn new(endpoint: Url, session_id: String) -> Self {
        Self {
            endpoint,
            session_id,
            sample_rate: 16000,
            encoding: "pcm_s16le".to_string(),
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            send_queue: 64,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.endpoint.scheme() {
            "ws" | "wss" => {}
            other => return Err(format!("unsupported endpoint scheme: {other}")),
        }
        if self.send_queue == 0 {
            return Err("send_queue must be at least 1".to_string());
        }
        self.backoff.validate()
    }
}

#[derive(Debug)]
enum ControlCommand {
    Reconnect,
    Shutdown,
}

/// Cloneable handle to the transport worker.
#[derive(Clone)]
pub struct TransportHandle {
    data_tx: mpsc::Sender<OutboundMessage>,
    ctrl_tx: mpsc::UnboundedSender<ControlCommand>,
    events: broadcast::Sender<TransportEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl TransportHandle {
    /// Fire-and-forget send. Never blocks; a chunk that cannot be queued is
    /// dropped and reported via [`TransportEvent::ChunkDropped`].
    pub fn send(&self, message: OutboundMessage) {
        if let Err(err) = self.data_tx.try_send(message) {
            let rejected = match err {
                TrySendError::Full(m) | TrySendError::Closed(m) => m,
            };
            match rejected {
                OutboundMessage::AudioChunk { turn_id, seq, .. } => {
                    warn!("outbound queue rejected audio chunk {turn_id}/{seq}");
                    let _ = self.events.send(TransportEvent::ChunkDropped { turn_id });
                }
                other => warn!("outbound queue rejected message: {other:?}"),
            }
        }
    }

    /// Queue one chunk of turn audio.
    pub fn send_chunk(&self, turn_id: u64, seq: u32, audio: Bytes) {
        self.send(OutboundMessage::AudioChunk {
            turn_id,
            seq,
            audio,
        });
    }

    /// Subscribe to transport events. Each subscriber gets every event from
    /// the moment of subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Watch the connection state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Request an immediate reconnect: skips any backoff delay, and restores
    /// the attempt budget after `Failed`.
    pub fn reconnect(&self) {
        let _ = self.ctrl_tx.send(ControlCommand::Reconnect);
    }

    /// Close the channel normally. Never triggers auto-reconnect.
    pub fn disconnect(&self) {
        let _ = self.ctrl_tx.send(ControlCommand::Shutdown);
    }
}

/// Spawns and owns the transport worker.
pub struct TransportClient;

impl TransportClient {
    /// Start the worker. Connection is attempted immediately.
    pub fn spawn(
        config: TransportConfig,
        connector: Arc<dyn ChannelConnector>,
    ) -> (TransportHandle, JoinHandle<()>) {
        let (data_tx, data_rx) = mpsc::channel(config.send_queue);
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let handle = TransportHandle {
            data_tx,
            ctrl_tx,
            events: event_tx.clone(),
            state_rx,
        };
        let worker = Worker {
            config,
            connector,
            data_rx,
            ctrl_rx,
            events: event_tx,
            state: state_tx,
            data_open: true,
        };
        let join = tokio::spawn(worker.run());
        (handle, join)
    }
}

/// Why the per-connection event loop ended.
enum Exit {
    /// Local shutdown; close normally and stop.
    Shutdown,
    /// Server closed with a normal code; stop without reconnecting.
    RemoteClose,
    /// Anything else; reconnect with backoff.
    Abnormal(String),
}

enum HandshakeError {
    Shutdown,
    Failed(String),
}

struct Worker {
    config: TransportConfig,
    connector: Arc<dyn ChannelConnector>,
    data_rx: mpsc::Receiver<OutboundMessage>,
    ctrl_rx: mpsc::UnboundedReceiver<ControlCommand>,
    events: broadcast::Sender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
    /// False once every data sender is gone; gates the recv arm so a closed
    /// channel cannot spin the select loop.
    data_open: bool,
}

impl Worker {
    async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.backoff);
        loop {
            self.set_state(if backoff.attempt() == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });

            let connected = timeout(
                self.config.connect_timeout,
                self.connector.connect(&self.config.endpoint),
            )
            .await;
            let (mut sink, mut stream) = match connected {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    warn!("connect to {} failed: {e}", self.config.endpoint);
                    self.emit(TransportEvent::Disconnected {
                        reason: e.to_string(),
                    });
                    if self.wait_backoff(&mut backoff).await {
                        continue;
                    }
                    break;
                }
                Err(_) => {
                    warn!("connect to {} timed out", self.config.endpoint);
                    self.emit(TransportEvent::Disconnected {
                        reason: "connect timeout".to_string(),
                    });
                    if self.wait_backoff(&mut backoff).await {
                        continue;
                    }
                    break;
                }
            };

            match self.handshake(sink.as_mut(), stream.as_mut()).await {
                Ok(()) => {}
                Err(HandshakeError::Shutdown) => {
                    let _ = sink.close().await;
                    self.set_state(ConnectionState::Disconnected);
                    break;
                }
                Err(HandshakeError::Failed(reason)) => {
                    warn!("handshake failed: {reason}");
                    self.emit(TransportEvent::Disconnected { reason });
                    if self.wait_backoff(&mut backoff).await {
                        continue;
                    }
                    break;
                }
            }

            backoff.reset();
            self.set_state(ConnectionState::Connected);
            self.emit(TransportEvent::Connected);
            info!("transport connected to {}", self.config.endpoint);

            match self.drive(sink.as_mut(), stream.as_mut()).await {
                Exit::Shutdown => {
                    let _ = sink.close().await;
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(TransportEvent::Disconnected {
                        reason: "closed by client".to_string(),
                    });
                    break;
                }
                Exit::RemoteClose => {
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(TransportEvent::Disconnected {
                        reason: "closed by server".to_string(),
                    });
                    break;
                }
                Exit::Abnormal(reason) => {
                    warn!("transport dropped: {reason}");
                    self.emit(TransportEvent::Disconnected { reason });
                    if !self.wait_backoff(&mut backoff).await {
                        break;
                    }
                }
            }
        }
        debug!("transport worker exited");
    }

    /// Send the `start` envelope and wait for `ready`.
    async fn handshake(
        &mut self,
        sink: &mut dyn ChannelSink,
        stream: &mut dyn ChannelStream,
    ) -> Result<(), HandshakeError> {
        let start = OutboundMessage::Start {
            session_id: self.config.session_id.clone(),
            sample_rate: self.config.sample_rate,
            encoding: self.config.encoding.clone(),
        };
        let json =
            serde_json::to_string(&start).map_err(|e| HandshakeError::Failed(e.to_string()))?;
        sink.send_text(json)
            .await
            .map_err(|e| HandshakeError::Failed(e.to_string()))?;

        let deadline = tokio::time::sleep(self.config.connect_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(HandshakeError::Failed("handshake timeout".to_string()));
                }
                cmd = self.ctrl_rx.recv() => match cmd {
                    None | Some(ControlCommand::Shutdown) => return Err(HandshakeError::Shutdown),
                    Some(ControlCommand::Reconnect) => {}
                },
                msg = self.data_rx.recv(), if self.data_open => self.drop_while_down(msg),
                incoming = stream.recv() => match incoming {
                    None => {
                        return Err(HandshakeError::Failed(
                            "stream ended during handshake".to_string(),
                        ));
                    }
                    Some(Err(e)) => return Err(HandshakeError::Failed(e.to_string())),
                    Some(Ok(ChannelMessage::Text(text))) => {
                        match serde_json::from_str::<InboundMessage>(&text) {
                            Ok(InboundMessage::Ready) => {
                                debug!("handshake acknowledged");
                                return Ok(());
                            }
                            Ok(other) => debug!("pre-ready message discarded: {other:?}"),
                            Err(e) => warn!("unparseable pre-ready message: {e}"),
                        }
                    }
                    Some(Ok(ChannelMessage::Binary(_))) => {
                        debug!("pre-ready binary message discarded");
                    }
                    Some(Ok(ChannelMessage::Close { reason, .. })) => {
                        return Err(HandshakeError::Failed(format!(
                            "closed during handshake: {reason}"
                        )));
                    }
                },
            }
        }
    }

    /// Per-connection event loop: pump outbound sends and inbound messages
    /// until the channel drops or shutdown is requested.
    async fn drive(&mut self, sink: &mut dyn ChannelSink, stream: &mut dyn ChannelStream) -> Exit {
        loop {
            tokio::select! {
                cmd = self.ctrl_rx.recv() => match cmd {
                    None | Some(ControlCommand::Shutdown) => return Exit::Shutdown,
                    Some(ControlCommand::Reconnect) => {
                        debug!("reconnect request ignored while connected");
                    }
                },
                msg = self.data_rx.recv(), if self.data_open => match msg {
                    None => self.data_open = false,
                    Some(outbound) => {
                        if let Err(e) = send_outbound(sink, outbound).await {
                            return Exit::Abnormal(e.to_string());
                        }
                    }
                },
                incoming = stream.recv() => match incoming {
                    None => return Exit::Abnormal("stream ended".to_string()),
                    Some(Err(e)) => return Exit::Abnormal(e.to_string()),
                    Some(Ok(ChannelMessage::Text(text))) => self.handle_text(&text),
                    Some(Ok(ChannelMessage::Binary(_))) => {
                        debug!("unexpected binary message from backend ignored");
                    }
                    Some(Ok(ChannelMessage::Close { normal: true, .. })) => return Exit::RemoteClose,
                    Some(Ok(ChannelMessage::Close { normal: false, reason })) => {
                        return Exit::Abnormal(format!("abnormal close: {reason}"));
                    }
                },
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(message) => {
                self.emit(TransportEvent::Inbound(message));
            }
            Err(e) => {
                warn!("unparseable message from backend: {e}");
                self.emit(TransportEvent::ProtocolError {
                    detail: e.to_string(),
                });
            }
        }
    }

    /// Sleep out the next backoff delay, or park in `Failed` until a manual
    /// reconnect. Returns false when the worker should stop. Outbound data
    /// arriving while down is dropped, never queued for the next link.
    async fn wait_backoff(&mut self, backoff: &mut Backoff) -> bool {
        match backoff.next_delay() {
            Some(delay) => {
                let attempt = backoff.attempt();
                self.set_state(ConnectionState::Reconnecting);
                self.emit(TransportEvent::Reconnecting { attempt, delay });
                info!("reconnect attempt {attempt} in {delay:?}");
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => return true,
                        cmd = self.ctrl_rx.recv() => match cmd {
                            None | Some(ControlCommand::Shutdown) => {
                                self.set_state(ConnectionState::Disconnected);
                                return false;
                            }
                            // Skip the rest of the delay.
                            Some(ControlCommand::Reconnect) => return true,
                        },
                        msg = self.data_rx.recv(), if self.data_open => self.drop_while_down(msg),
                    }
                }
            }
            None => {
                error!(
                    "reconnect attempts exhausted after {} tries",
                    self.config.backoff.max_attempts
                );
                self.set_state(ConnectionState::Failed);
                self.emit(TransportEvent::Failed);
                loop {
                    tokio::select! {
                        cmd = self.ctrl_rx.recv() => match cmd {
                            None | Some(ControlCommand::Shutdown) => {
                                self.set_state(ConnectionState::Disconnected);
                                return false;
                            }
                            Some(ControlCommand::Reconnect) => {
                                info!("manual reconnect after failure");
                                backoff.reset();
                                return true;
                            }
                        },
                        msg = self.data_rx.recv(), if self.data_open => self.drop_while_down(msg),
                    }
                }
            }
        }
    }

    /// Discard an outbound message while the link is down.
    fn drop_while_down(&mut self, msg: Option<OutboundMessage>) {
        match msg {
            None => self.data_open = false,
            Some(OutboundMessage::AudioChunk { turn_id, seq, .. }) => {
                warn!("dropping audio chunk {turn_id}/{seq}: not connected");
                self.emit(TransportEvent::ChunkDropped { turn_id });
            }
            Some(other) => debug!("dropping outbound message while down: {other:?}"),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("connection state {current} -> {state}");
                *current = state;
                true
            }
        });
    }

    fn emit(&self, event: TransportEvent) {
        // A send error only means no subscriber is listening right now.
        let _ = self.events.send(event);
    }
}

async fn send_outbound(
    sink: &mut dyn ChannelSink,
    message: OutboundMessage,
) -> Result<(), TransportError> {
    match message {
        OutboundMessage::AudioChunk {
            turn_id,
            seq,
            audio,
        } => sink.send_binary(encode_chunk(turn_id, seq, &audio)).await,
        other => {
            let json = serde_json::to_string(&other)
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
            sink.send_text(json).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_rejects_bad_scheme() {
        let endpoint = Url::parse("http://localhost:9000/ws").unwrap();
        let config = TransportConfig::new(endpoint, "s".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_validation_accepts_ws_and_wss() {
        for scheme in ["ws", "wss"] {
            let endpoint = Url::parse(&format!("{scheme}://host/ws")).unwrap();
            let config = TransportConfig::new(endpoint, "s".to_string());
            assert!(config.validate().is_ok(), "{scheme} should validate");
        }
    }

    #[test]
    fn config_validation_rejects_zero_queue() {
        let endpoint = Url::parse("ws://host/ws").unwrap();
        let mut config = TransportConfig::new(endpoint, "s".to_string());
        config.send_queue = 0;
        assert!(config.validate().is_err());
    }
}
