//! Frame encoding and decoding.
//!
//! One [`FrameCodec`] lives per connection: it owns the streaming
//! inflater (when transport compression is on) and knows which wire
//! encoding is in use. Both codecs produce the same
//! [`GatewayPacket`] representation, so everything downstream is
//! encoding-agnostic.

use crate::compression::ZlibInflater;
use crate::error::GatewayError;
use crate::etf::{self, EtfDecoder};
use crate::opcode::OpCode;
use crate::payload::GatewayPacket;

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

/// Gateway wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayEncoding {
    /// JSON encoding (human-readable).
    #[default]
    Json,
    /// ETF encoding (smaller, binary).
    Etf,
}

impl GatewayEncoding {
    /// The encoding this build uses: ETF when compiled in, else JSON.
    pub const fn for_build() -> Self {
        if cfg!(feature = "etf") {
            Self::Etf
        } else {
            Self::Json
        }
    }

    /// Value of the `encoding` query parameter in the connect URL.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Etf => "etf",
        }
    }
}

/// Encode an outbound `{op, d}` packet as a WebSocket message.
pub fn encode_packet(
    encoding: GatewayEncoding,
    op: OpCode,
    data: Value,
) -> Result<Message, GatewayError> {
    let packet = GatewayPacket::new(op, data);
    match encoding {
        GatewayEncoding::Json => Ok(Message::Text(serde_json::to_string(&packet)?.into())),
        GatewayEncoding::Etf => {
            let value = serde_json::to_value(&packet)?;
            Ok(Message::Binary(etf::encode_value(&value).into()))
        }
    }
}

/// Per-connection frame decoder.
pub struct FrameCodec {
    encoding: GatewayEncoding,
    inflater: Option<ZlibInflater>,
}

impl FrameCodec {
    /// Create a codec; `compress` enables the zlib-stream inflater.
    pub fn new(encoding: GatewayEncoding, compress: bool) -> Self {
        Self {
            encoding,
            inflater: compress.then(ZlibInflater::new),
        }
    }

    /// The wire encoding in use.
    pub fn encoding(&self) -> GatewayEncoding {
        self.encoding
    }

    /// Decode a text frame. Text frames are always JSON.
    pub fn decode_text(&self, text: &str) -> Result<GatewayPacket, GatewayError> {
        serde_json::from_str(text).map_err(GatewayError::from)
    }

    /// Decode a binary frame.
    ///
    /// With compression enabled, returns `Ok(None)` until the frame
    /// completes a logical message.
    pub fn decode_binary(&mut self, data: &[u8]) -> Result<Option<GatewayPacket>, GatewayError> {
        let encoding = self.encoding;
        match self.inflater.as_mut() {
            Some(inflater) => match inflater.push(data)? {
                Some(message) => Self::decode_bytes(encoding, message).map(Some),
                None => Ok(None),
            },
            None => Self::decode_bytes(encoding, data).map(Some),
        }
    }

    fn decode_bytes(
        encoding: GatewayEncoding,
        bytes: &[u8],
    ) -> Result<GatewayPacket, GatewayError> {
        match encoding {
            GatewayEncoding::Json => serde_json::from_slice(bytes).map_err(GatewayError::from),
            GatewayEncoding::Etf => {
                let term = EtfDecoder::decode(bytes)?;
                let value = etf::term_to_value(&term)?;
                serde_json::from_value(value).map_err(GatewayError::from)
            }
        }
    }

    /// Reset per-connection state (the inflater dictionary).
    pub fn reset(&mut self) {
        if let Some(inflater) = self.inflater.as_mut() {
            inflater.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_text_dispatch() {
        let codec = FrameCodec::new(GatewayEncoding::Json, false);
        let packet = codec
            .decode_text(r#"{"op":0,"s":7,"t":"TYPING_START","d":{"channel_id":"1"}}"#)
            .unwrap();
        assert_eq!(packet.op, OpCode::Dispatch);
        assert_eq!(packet.s, Some(7));
    }

    #[test]
    fn test_encode_json_heartbeat() {
        let frame = encode_packet(GatewayEncoding::Json, OpCode::Heartbeat, json!(12)).unwrap();
        match frame {
            Message::Text(text) => assert_eq!(text.as_str(), r#"{"op":1,"d":12}"#),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_etf_round_trip() {
        let frame = encode_packet(
            GatewayEncoding::Etf,
            OpCode::Resume,
            json!({"token": "t", "session_id": "s", "seq": 42}),
        )
        .unwrap();

        let mut codec = FrameCodec::new(GatewayEncoding::Etf, false);
        let packet = match frame {
            Message::Binary(bytes) => codec.decode_binary(&bytes).unwrap().unwrap(),
            other => panic!("expected binary frame, got {other:?}"),
        };
        assert_eq!(packet.op, OpCode::Resume);
        assert_eq!(packet.d.unwrap()["seq"], 42);
    }

    #[test]
    fn test_compressed_stream_decoding() {
        use flate2::{Compress, Compression, FlushCompress};

        let mut z = Compress::new(Compression::default(), true);
        let payload = br#"{"op":11,"d":null}"#;
        let mut frame = Vec::with_capacity(payload.len() + 128);
        z.compress_vec(payload, &mut frame, FlushCompress::Sync)
            .unwrap();

        let mut codec = FrameCodec::new(GatewayEncoding::Json, true);
        // Feed in two halves: no packet until the trailer arrives.
        let split = frame.len() - 3;
        assert!(codec.decode_binary(&frame[..split]).unwrap().is_none());
        let packet = codec.decode_binary(&frame[split..]).unwrap().unwrap();
        assert_eq!(packet.op, OpCode::HeartbeatAck);
    }

    #[test]
    fn test_decode_error_is_surfaced() {
        let codec = FrameCodec::new(GatewayEncoding::Json, false);
        assert!(matches!(
            codec.decode_text("{not json"),
            Err(GatewayError::Decode(_))
        ));
    }
}
