//! The message-channel capability seam and its WebSocket implementation.
//!
//! The transport client is written against [`ChannelConnector`], which
//! hands back a split sink/stream pair so the client's event loop can
//! select over inbound messages while writing outbound ones. The reconnect
//! and framing logic is exercised with in-memory channels in tests;
//! [`WsConnector`] is the production implementation over tokio-tungstenite.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use super::TransportError;

/// One message off the wire, collapsed to the cases the client cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
    /// The peer closed the channel. `normal` distinguishes a clean close
    /// from an abnormal one, which drives the reconnect decision.
    Close { normal: bool, reason: String },
}

/// Write half of a connected channel.
#[async_trait]
pub trait ChannelSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    async fn send_binary(&mut self, payload: Bytes) -> Result<(), TransportError>;
    /// Initiate a normal close.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connected channel.
#[async_trait]
pub trait ChannelStream: Send {
    /// Next inbound message; `None` when the stream has ended.
    async fn recv(&mut self) -> Option<Result<ChannelMessage, TransportError>>;
}

/// A freshly connected channel, already split for the event loop.
pub type SplitChannel = (Box<dyn ChannelSink>, Box<dyn ChannelStream>);

/// Dials new channels. One connector serves the whole client lifetime,
/// including reconnects.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<SplitChannel, TransportError>;
}

/// WebSocket connector over tokio-tungstenite.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, endpoint: &Url) -> Result<SplitChannel, TransportError> {
        let (ws, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!("websocket connected to {endpoint}");
        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsStream { stream })))
    }
}

type WsTransport = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsSink {
    sink: SplitSink<WsTransport, Message>,
}

#[async_trait]
impl ChannelSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    async fn send_binary(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.sink
            .send(Message::Binary(payload))
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }
}

struct WsStream {
    stream: SplitStream<WsTransport>,
}

#[async_trait]
impl ChannelStream for WsStream {
    async fn recv(&mut self) -> Option<Result<ChannelMessage, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(m) => m,
                Err(e) => return Some(Err(TransportError::Network(e.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(ChannelMessage::Text(text.to_string()))),
                Message::Binary(payload) => return Some(Ok(ChannelMessage::Binary(payload))),
                Message::Close(frame) => {
                    let (normal, reason) = match frame {
                        Some(f) => (f.code == CloseCode::Normal, f.reason.to_string()),
                        None => (true, String::new()),
                    };
                    return Some(Ok(ChannelMessage::Close { normal, reason }));
                }
                // Ping/pong are answered by tungstenite itself; raw frames
                // never surface in this read mode.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}
