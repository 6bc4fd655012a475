//! Wire message types for the backend channel.
//!
//! Control and transcript traffic travels as JSON envelopes tagged by
//! `type`. Outbound audio chunks bypass JSON entirely and ride as binary
//! frames with a fixed 16-byte header (see [`encode_chunk`]) to keep the
//! capture path free of base64 overhead. Inbound synthesized audio arrives
//! as JSON with a base64 payload since it carries a mime type alongside.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Header length of a binary audio-chunk frame:
/// turn id (u64 BE) + seq (u32 BE) + flags (u32 BE, reserved).
pub const CHUNK_HEADER_LEN: usize = 16;

/// Messages sent to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Connect handshake; sent first on every (re)connect.
    Start {
        session_id: String,
        sample_rate: u32,
        encoding: String,
    },
    /// One chunk of turn audio. Encoded as a binary frame on the wire.
    AudioChunk {
        turn_id: u64,
        seq: u32,
        #[serde(skip)]
        audio: Bytes,
    },
    /// The turn's audio is complete.
    AudioEnd { turn_id: u64 },
    /// Abandon the in-flight reply (barge-in, timeout, reset).
    Stop { reason: String },
}

/// Messages received from the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Handshake acknowledgment; the channel is usable once this arrives.
    Ready,
    TranscriptPartial {
        turn_id: u64,
        text: String,
    },
    TranscriptFinal {
        turn_id: u64,
        text: String,
    },
    ReplyText {
        turn_id: u64,
        text: String,
    },
    AudioSegment {
        turn_id: u64,
        seq: u32,
        mime: String,
        #[serde(with = "base64_bytes")]
        audio: Bytes,
    },
    ReplyEnd {
        turn_id: u64,
    },
    Error {
        message: String,
    },
}

impl InboundMessage {
    /// The turn this message belongs to, if it is turn-scoped.
    pub fn turn_id(&self) -> Option<u64> {
        match self {
            InboundMessage::TranscriptPartial { turn_id, .. }
            | InboundMessage::TranscriptFinal { turn_id, .. }
            | InboundMessage::ReplyText { turn_id, .. }
            | InboundMessage::AudioSegment { turn_id, .. }
            | InboundMessage::ReplyEnd { turn_id } => Some(*turn_id),
            InboundMessage::Ready | InboundMessage::Error { .. } => None,
        }
    }
}

/// Connection lifecycle as observed by consumers. Written only by the
/// transport client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Events published by the transport client to its subscribers.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Handshake completed; sends will reach the backend.
    Connected,
    /// The channel dropped. A reconnect may follow unless the close was
    /// requested locally.
    Disconnected { reason: String },
    /// A reconnect attempt is scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// A message arrived from the backend.
    Inbound(InboundMessage),
    /// An audio chunk was dropped because the channel is not connected.
    ChunkDropped { turn_id: u64 },
    /// The backend sent something unparseable.
    ProtocolError { detail: String },
    /// Reconnect attempts are exhausted; manual retry required.
    Failed,
}

/// Frame an audio chunk as binary: 16-byte header + raw PCM payload.
pub fn encode_chunk(turn_id: u64, seq: u32, audio: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(CHUNK_HEADER_LEN + audio.len());
    buf.put_u64(turn_id);
    buf.put_u32(seq);
    buf.put_u32(0); // flags, reserved
    buf.extend_from_slice(audio);
    buf.freeze()
}

/// Split a binary chunk frame back into (turn_id, seq, payload).
pub fn decode_chunk(frame: &Bytes) -> Result<(u64, u32, Bytes), String> {
    if frame.len() < CHUNK_HEADER_LEN {
        return Err(format!(
            "chunk frame too short: {} bytes (need {CHUNK_HEADER_LEN})",
            frame.len()
        ));
    }
    let turn_id = u64::from_be_bytes(frame[0..8].try_into().expect("8-byte slice"));
    let seq = u32::from_be_bytes(frame[8..12].try_into().expect("4-byte slice"));
    Ok((turn_id, seq, frame.slice(CHUNK_HEADER_LEN..)))
}

mod base64_bytes {
    //! Serde adapter carrying `Bytes` as base64 text inside JSON.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_envelope_shape() {
        let msg = OutboundMessage::AudioEnd { turn_id: 7 };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"audio_end","turn_id":7}"#);
    }

    #[test]
    fn start_handshake_round_trip() {
        let msg = OutboundMessage::Start {
            session_id: "abc".to_string(),
            sample_rate: 16000,
            encoding: "pcm_s16le".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: OutboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn inbound_audio_segment_parses_base64() {
        let json = r#"{"type":"audio_segment","turn_id":3,"seq":0,"mime":"audio/pcm","audio":"AAEC"}"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        match msg {
            InboundMessage::AudioSegment {
                turn_id,
                seq,
                mime,
                audio,
            } => {
                assert_eq!(turn_id, 3);
                assert_eq!(seq, 0);
                assert_eq!(mime, "audio/pcm");
                assert_eq!(&audio[..], &[0u8, 1, 2]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn inbound_garbage_is_an_error() {
        assert!(serde_json::from_str::<InboundMessage>(r#"{"type":"nope"}"#).is_err());
    }

    #[test]
    fn turn_id_extraction() {
        let msg = InboundMessage::ReplyEnd { turn_id: 9 };
        assert_eq!(msg.turn_id(), Some(9));
        assert_eq!(InboundMessage::Ready.turn_id(), None);
    }

    #[test]
    fn chunk_frame_round_trip() {
        let payload = Bytes::from_static(&[1, 2, 3, 4]);
        let frame = encode_chunk(42, 7, &payload);
        assert_eq!(frame.len(), CHUNK_HEADER_LEN + 4);
        let (turn_id, seq, audio) = decode_chunk(&frame).unwrap();
        assert_eq!(turn_id, 42);
        assert_eq!(seq, 7);
        assert_eq!(audio, payload);
    }

    #[test]
    fn short_chunk_frame_rejected() {
        let frame = Bytes::from_static(&[0u8; 8]);
        assert!(decode_chunk(&frame).is_err());
    }
}
