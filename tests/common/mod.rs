//! Scripted implementations of the platform capability seams, used to
//! drive the pipeline without real devices or sockets.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use url::Url;

use parla::audio::AudioFrame;
use parla::core::capture::{CaptureError, MicrophoneSource};
use parla::core::playback::{AudioSink, PlaybackError, SinkProvider};
use parla::core::transport::{
    decode_chunk, ChannelConnector, ChannelMessage, ChannelSink, ChannelStream, InboundMessage,
    OutboundMessage, SplitChannel, TransportError,
};

/// Log to stderr when RUST_LOG is set; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ─── Microphone ─────────────────────────────────────────────────────────

/// Pushes frames into the capture worker from test code. Dropping every
/// clone ends the stream.
#[derive(Clone)]
pub struct MicScript {
    tx: mpsc::UnboundedSender<Vec<i16>>,
    frame_samples: usize,
}

impl MicScript {
    /// Push `count` frames of constant normalized energy.
    pub fn push_energy(&self, energy: f32, count: usize) {
        let amplitude = (energy * i16::MAX as f32) as i16;
        for _ in 0..count {
            let _ = self.tx.send(vec![amplitude; self.frame_samples]);
        }
    }

    /// Push `count` silent frames.
    pub fn push_silence(&self, count: usize) {
        self.push_energy(0.0, count);
    }
}

/// A microphone fed by a [`MicScript`].
pub struct ScriptedMicrophone {
    sample_rate: u32,
    frame_samples: usize,
    rx: mpsc::UnboundedReceiver<Vec<i16>>,
    next_seq: u64,
}

impl ScriptedMicrophone {
    /// 16kHz, 100ms frames: VAD time advances 100ms per pushed frame.
    pub fn new() -> (Self, MicScript) {
        Self::with_format(16000, 1600)
    }

    pub fn with_format(sample_rate: u32, frame_samples: usize) -> (Self, MicScript) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sample_rate,
                frame_samples,
                rx,
                next_seq: 0,
            },
            MicScript { tx, frame_samples },
        )
    }
}

#[async_trait]
impl MicrophoneSource for ScriptedMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.frame_samples
    }

    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, CaptureError> {
        match self.rx.recv().await {
            Some(samples) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                Ok(Some(AudioFrame::new(samples, seq, self.sample_rate)))
            }
            None => Ok(None),
        }
    }
}

/// A microphone that fails on first read.
pub struct FailingMicrophone;

#[async_trait]
impl MicrophoneSource for FailingMicrophone {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn frame_size(&self) -> usize {
        1600
    }

    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, CaptureError> {
        Err(CaptureError::DeviceUnavailable("no microphone".to_string()))
    }
}

// ─── Audio sink ─────────────────────────────────────────────────────────

/// Sink whose `play` takes one millisecond per payload byte (instant under
/// a paused clock) and stops promptly on `halt`.
pub struct TestSink {
    halt: Notify,
}

#[async_trait]
impl AudioSink for TestSink {
    async fn play(&self, audio: &Bytes, mime: &str) -> Result<(), PlaybackError> {
        if mime == "audio/fail" {
            return Err(PlaybackError::Decode("scripted failure".to_string()));
        }
        let duration = Duration::from_millis(audio.len() as u64);
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.halt.notified() => Ok(()),
        }
    }

    fn halt(&self) {
        // Stores a permit so a halt racing ahead of the first poll still
        // cancels the playback.
        self.halt.notify_one();
    }
}

/// Counts device acquisitions so tests can assert lazy acquire/release.
#[derive(Default)]
pub struct TestSinkProvider {
    pub acquired: AtomicUsize,
}

impl SinkProvider for TestSinkProvider {
    fn acquire(&self) -> Result<Box<dyn AudioSink>, PlaybackError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestSink { halt: Notify::new() }))
    }
}

/// Provider with no device at all.
pub struct NoDeviceProvider;

impl SinkProvider for NoDeviceProvider {
    fn acquire(&self) -> Result<Box<dyn AudioSink>, PlaybackError> {
        Err(PlaybackError::DeviceUnavailable("no speaker".to_string()))
    }
}

// ─── Transport channel ──────────────────────────────────────────────────

type ServerInbound = Result<ChannelMessage, TransportError>;

/// The backend side of one scripted connection.
pub struct TestServer {
    to_client: Option<mpsc::UnboundedSender<ServerInbound>>,
    from_client: mpsc::UnboundedReceiver<ChannelMessage>,
}

impl TestServer {
    /// Complete the handshake.
    pub async fn accept(&mut self) {
        let start = self.expect_text().await;
        match start {
            OutboundMessage::Start { .. } => {}
            other => panic!("expected start handshake, got {other:?}"),
        }
        self.send(&InboundMessage::Ready);
    }

    /// Inject an inbound JSON message.
    pub fn send(&self, message: &InboundMessage) {
        let json = serde_json::to_string(message).expect("serializable message");
        self.send_raw_text(json);
    }

    pub fn send_raw_text(&self, text: String) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(ChannelMessage::Text(text)));
        }
    }

    /// Close the link abnormally (triggers reconnect).
    pub fn drop_link(&mut self) {
        self.to_client = None;
    }

    /// Close the link normally (no reconnect).
    pub fn close_normally(&mut self) {
        if let Some(tx) = self.to_client.take() {
            let _ = tx.send(Ok(ChannelMessage::Close {
                normal: true,
                reason: "done".to_string(),
            }));
        }
    }

    /// Next outbound control message, parsed from its JSON envelope.
    pub async fn expect_text(&mut self) -> OutboundMessage {
        loop {
            match self.recv().await {
                ChannelMessage::Text(text) => {
                    return serde_json::from_str(&text).expect("valid outbound envelope");
                }
                ChannelMessage::Binary(_) => continue,
                ChannelMessage::Close { .. } => panic!("channel closed awaiting text"),
            }
        }
    }

    /// Next outbound audio chunk, decoded from its binary frame.
    pub async fn expect_chunk(&mut self) -> (u64, u32, Bytes) {
        loop {
            match self.recv().await {
                ChannelMessage::Binary(frame) => {
                    return decode_chunk(&frame).expect("valid chunk frame");
                }
                ChannelMessage::Text(_) => continue,
                ChannelMessage::Close { .. } => panic!("channel closed awaiting chunk"),
            }
        }
    }

    /// Either a parsed control message or a decoded chunk, in send order.
    pub async fn expect_message(&mut self) -> ServerSaw {
        match self.recv().await {
            ChannelMessage::Text(text) => {
                ServerSaw::Control(serde_json::from_str(&text).expect("valid outbound envelope"))
            }
            ChannelMessage::Binary(frame) => {
                let (turn_id, seq, audio) = decode_chunk(&frame).expect("valid chunk frame");
                ServerSaw::Chunk {
                    turn_id,
                    seq,
                    audio,
                }
            }
            ChannelMessage::Close { .. } => ServerSaw::Closed,
        }
    }

    async fn recv(&mut self) -> ChannelMessage {
        tokio::time::timeout(Duration::from_secs(60), self.from_client.recv())
            .await
            .expect("timed out awaiting client message")
            .expect("client side gone")
    }
}

#[derive(Debug)]
pub enum ServerSaw {
    Control(OutboundMessage),
    Chunk { turn_id: u64, seq: u32, audio: Bytes },
    Closed,
}

/// Connector whose connections are scripted: each attempt either refuses
/// or yields a fresh in-memory channel whose server half is handed to the
/// test.
pub struct TestConnector {
    refusals: Mutex<VecDeque<bool>>,
    servers: mpsc::UnboundedSender<TestServer>,
    pub attempts: AtomicUsize,
}

impl TestConnector {
    /// Connector accepting every attempt.
    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<TestServer>) {
        Self::with_refusals(&[])
    }

    /// `refusals[i]` = true makes attempt i fail before a channel opens.
    pub fn with_refusals(refusals: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<TestServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                refusals: Mutex::new(refusals.iter().copied().collect()),
                servers: tx,
                attempts: AtomicUsize::new(0),
            }),
            rx,
        )
    }
}

#[async_trait]
impl ChannelConnector for TestConnector {
    async fn connect(&self, _endpoint: &Url) -> Result<SplitChannel, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refuse = self.refusals.lock().pop_front().unwrap_or(false);
        if refuse {
            return Err(TransportError::ConnectionFailed(
                "scripted refusal".to_string(),
            ));
        }
        let (client_tx, server_rx) = mpsc::unbounded_channel::<ChannelMessage>();
        let (server_tx, client_rx) = mpsc::unbounded_channel::<ServerInbound>();
        let _ = self.servers.send(TestServer {
            to_client: Some(server_tx),
            from_client: server_rx,
        });
        Ok((
            Box::new(TestChannelSink { tx: client_tx }),
            Box::new(TestChannelStream { rx: client_rx }),
        ))
    }
}

struct TestChannelSink {
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

#[async_trait]
impl ChannelSink for TestChannelSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(ChannelMessage::Text(text))
            .map_err(|_| TransportError::Network("server gone".to_string()))
    }

    async fn send_binary(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(ChannelMessage::Binary(payload))
            .map_err(|_| TransportError::Network("server gone".to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.tx.send(ChannelMessage::Close {
            normal: true,
            reason: String::new(),
        });
        Ok(())
    }
}

struct TestChannelStream {
    rx: mpsc::UnboundedReceiver<ServerInbound>,
}

#[async_trait]
impl ChannelStream for TestChannelStream {
    async fn recv(&mut self) -> Option<ServerInbound> {
        self.rx.recv().await
    }
}

// ─── Watch helpers ──────────────────────────────────────────────────────

/// Wait until the watched value satisfies `predicate`.
pub async fn wait_until<T: Clone>(
    rx: &mut watch::Receiver<T>,
    what: &str,
    mut predicate: impl FnMut(&T) -> bool,
) {
    let result = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if predicate(&rx.borrow()) {
                return;
            }
            if rx.changed().await.is_err() {
                panic!("watch closed while waiting for {what}");
            }
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}
