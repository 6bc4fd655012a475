//! Resilient bidirectional message transport to the voice backend.
//!
//! One logical channel carries JSON control envelopes and binary audio
//! frames. The client reconnects with exponential backoff on abnormal
//! closure and surfaces everything it sees as [`TransportEvent`]s.

pub mod backoff;
pub mod channel;
pub mod client;
pub mod messages;

pub use backoff::{Backoff, BackoffConfig};
pub use channel::{
    ChannelConnector, ChannelMessage, ChannelSink, ChannelStream, SplitChannel, WsConnector,
};
pub use client::{TransportClient, TransportConfig, TransportError, TransportHandle};
pub use messages::{
    decode_chunk, encode_chunk, ConnectionState, InboundMessage, OutboundMessage, TransportEvent,
    CHUNK_HEADER_LEN,
};
