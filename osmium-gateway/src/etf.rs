//! Erlang Term Format (ETF) codec.
//!
//! Discord supports ETF as an alternative to JSON for Gateway payloads;
//! it is roughly 30% smaller on the wire. Only the subset Discord
//! actually emits is handled: atoms, integers (small/big), floats,
//! binaries, strings, lists, tuples, maps, and nil.
//!
//! Decoded terms are bridged into [`serde_json::Value`] so the rest of
//! the pipeline is codec-agnostic; outbound values are encoded straight
//! from the same representation.

use crate::error::GatewayError;

/// ETF format version tag.
const ETF_VERSION: u8 = 131;

/// ETF term tags.
mod tags {
    pub const NEW_FLOAT: u8 = 70;
    pub const COMPRESSED: u8 = 80;
    pub const SMALL_INTEGER: u8 = 97;
    pub const INTEGER: u8 = 98;
    pub const FLOAT: u8 = 99;
    pub const ATOM: u8 = 100;
    pub const SMALL_TUPLE: u8 = 104;
    pub const LARGE_TUPLE: u8 = 105;
    pub const NIL: u8 = 106;
    pub const STRING: u8 = 107;
    pub const LIST: u8 = 108;
    pub const BINARY: u8 = 109;
    pub const SMALL_BIG: u8 = 110;
    pub const LARGE_BIG: u8 = 111;
    pub const MAP: u8 = 116;
    pub const ATOM_UTF8: u8 = 118;
    pub const SMALL_ATOM_UTF8: u8 = 119;
}

/// An ETF term.
#[derive(Debug, Clone, PartialEq)]
pub enum EtfTerm {
    /// A small integer (0-255).
    SmallInt(u8),
    /// A signed 32-bit integer.
    Int(i32),
    /// A big integer, truncated to 128 bits (plenty for snowflakes).
    BigInt(i128),
    /// A 64-bit float.
    Float(f64),
    /// An atom.
    Atom(String),
    /// A tuple.
    Tuple(Vec<EtfTerm>),
    /// Nil (the empty list, used as null).
    Nil,
    /// A string (a list of bytes in ETF).
    String(String),
    /// A list of terms.
    List(Vec<EtfTerm>),
    /// A binary; Discord uses these for strings.
    Binary(Vec<u8>),
    /// A map of key/value pairs.
    Map(Vec<(EtfTerm, EtfTerm)>),
}

/// ETF decoder over a byte slice.
pub struct EtfDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> EtfDecoder<'a> {
    /// Create a decoder over the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decode a full ETF payload (version byte included).
    pub fn decode(data: &[u8]) -> Result<EtfTerm, GatewayError> {
        let mut decoder = EtfDecoder::new(data);
        let version = decoder.read_u8()?;
        if version != ETF_VERSION {
            return Err(GatewayError::Decode(format!(
                "invalid ETF version: expected {ETF_VERSION}, got {version}"
            )));
        }
        decoder.read_term()
    }

    fn read_term(&mut self) -> Result<EtfTerm, GatewayError> {
        let tag = self.read_u8()?;

        match tag {
            tags::SMALL_INTEGER => Ok(EtfTerm::SmallInt(self.read_u8()?)),

            tags::INTEGER => Ok(EtfTerm::Int(self.read_i32()?)),

            tags::FLOAT => {
                // Legacy float format: 31-byte ASCII representation.
                let bytes = self.read_bytes(31)?;
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| GatewayError::Decode(format!("invalid float string: {e}")))?
                    .trim_end_matches('\0');
                let value: f64 = text
                    .parse()
                    .map_err(|e| GatewayError::Decode(format!("invalid float: {e}")))?;
                Ok(EtfTerm::Float(value))
            }

            tags::NEW_FLOAT => {
                let bytes = self.read_bytes(8)?;
                let raw: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| GatewayError::Decode("invalid float bytes".to_owned()))?;
                Ok(EtfTerm::Float(f64::from_be_bytes(raw)))
            }

            tags::ATOM | tags::ATOM_UTF8 => {
                let len = self.read_u16()? as usize;
                let bytes = self.read_bytes(len)?;
                Ok(EtfTerm::Atom(String::from_utf8_lossy(bytes).into_owned()))
            }

            tags::SMALL_ATOM_UTF8 => {
                let len = self.read_u8()? as usize;
                let bytes = self.read_bytes(len)?;
                Ok(EtfTerm::Atom(String::from_utf8_lossy(bytes).into_owned()))
            }

            tags::SMALL_TUPLE => {
                let arity = self.read_u8()? as usize;
                self.read_seq(arity).map(EtfTerm::Tuple)
            }

            tags::LARGE_TUPLE => {
                let arity = self.read_u32()? as usize;
                self.read_seq(arity).map(EtfTerm::Tuple)
            }

            tags::NIL => Ok(EtfTerm::Nil),

            tags::STRING => {
                let len = self.read_u16()? as usize;
                let bytes = self.read_bytes(len)?;
                Ok(EtfTerm::String(String::from_utf8_lossy(bytes).into_owned()))
            }

            tags::LIST => {
                let len = self.read_u32()? as usize;
                let elements = self.read_seq(len)?;
                // Proper lists carry a tail term, normally nil.
                let _tail = self.read_term()?;
                Ok(EtfTerm::List(elements))
            }

            tags::BINARY => {
                let len = self.read_u32()? as usize;
                Ok(EtfTerm::Binary(self.read_bytes(len)?.to_vec()))
            }

            tags::SMALL_BIG => {
                let n = self.read_u8()? as usize;
                self.read_big(n)
            }

            tags::LARGE_BIG => {
                let n = self.read_u32()? as usize;
                self.read_big(n)
            }

            tags::MAP => {
                let arity = self.read_u32()? as usize;
                let mut pairs = Vec::with_capacity(arity.min(1024));
                for _ in 0..arity {
                    let key = self.read_term()?;
                    let value = self.read_term()?;
                    pairs.push((key, value));
                }
                Ok(EtfTerm::Map(pairs))
            }

            tags::COMPRESSED => {
                let uncompressed_size = self.read_u32()? as usize;
                let remaining = &self.data[self.pos..];

                use flate2::read::ZlibDecoder;
                use std::io::Read;

                let mut decoder = ZlibDecoder::new(remaining);
                let mut inflated = Vec::with_capacity(uncompressed_size);
                decoder
                    .read_to_end(&mut inflated)
                    .map_err(|e| GatewayError::Decode(format!("ETF inflate failed: {e}")))?;
                self.pos = self.data.len();

                EtfDecoder::new(&inflated).read_term()
            }

            _ => Err(GatewayError::Decode(format!(
                "unknown ETF tag {tag} at offset {}",
                self.pos - 1
            ))),
        }
    }

    fn read_seq(&mut self, count: usize) -> Result<Vec<EtfTerm>, GatewayError> {
        let mut elements = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            elements.push(self.read_term()?);
        }
        Ok(elements)
    }

    /// Big integers are little-endian magnitude plus a sign byte.
    fn read_big(&mut self, n: usize) -> Result<EtfTerm, GatewayError> {
        let sign = self.read_u8()?;
        let bytes = self.read_bytes(n)?;

        let mut value: i128 = 0;
        for (i, &byte) in bytes.iter().take(16).enumerate() {
            value |= (byte as i128) << (i * 8);
        }
        if sign != 0 {
            value = -value;
        }

        Ok(EtfTerm::BigInt(value))
    }

    #[inline]
    fn read_u8(&mut self) -> Result<u8, GatewayError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| GatewayError::Decode("unexpected end of ETF data".to_owned()))?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_u16(&mut self) -> Result<u16, GatewayError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    #[inline]
    fn read_u32(&mut self) -> Result<u32, GatewayError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    #[inline]
    fn read_i32(&mut self) -> Result<i32, GatewayError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], GatewayError> {
        if self.pos + n > self.data.len() {
            return Err(GatewayError::Decode("unexpected end of ETF data".to_owned()));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }
}

/// Convert a decoded term to a [`serde_json::Value`].
///
/// Snowflake-sized big integers that would lose precision as JSON
/// numbers become strings, matching the JSON wire shape.
pub fn term_to_value(term: &EtfTerm) -> Result<serde_json::Value, GatewayError> {
    use serde_json::Value;

    match term {
        EtfTerm::SmallInt(n) => Ok(Value::Number((*n as i64).into())),
        EtfTerm::Int(n) => Ok(Value::Number((*n as i64).into())),
        EtfTerm::BigInt(n) => {
            if *n > i64::MAX as i128 || *n < i64::MIN as i128 {
                Ok(Value::String(n.to_string()))
            } else {
                Ok(Value::Number((*n as i64).into()))
            }
        }
        EtfTerm::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| GatewayError::Decode("non-finite float".to_owned())),
        EtfTerm::Atom(s) => match s.as_str() {
            "nil" | "null" => Ok(Value::Null),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Ok(Value::String(s.clone())),
        },
        EtfTerm::Nil => Ok(Value::Null),
        EtfTerm::String(s) => Ok(Value::String(s.clone())),
        EtfTerm::Tuple(elements) | EtfTerm::List(elements) => {
            let array: Result<Vec<_>, _> = elements.iter().map(term_to_value).collect();
            Ok(Value::Array(array?))
        }
        EtfTerm::Binary(bytes) => Ok(Value::String(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        EtfTerm::Map(pairs) => {
            let mut map = serde_json::Map::with_capacity(pairs.len());
            for (key, value) in pairs {
                let key = match key {
                    EtfTerm::Atom(s) | EtfTerm::String(s) => s.clone(),
                    EtfTerm::Binary(b) => String::from_utf8_lossy(b).into_owned(),
                    other => term_to_value(other)?.to_string(),
                };
                map.insert(key, term_to_value(value)?);
            }
            Ok(Value::Object(map))
        }
    }
}

/// Encode a [`serde_json::Value`] as an ETF payload (version byte
/// included). The inverse of decode-then-[`term_to_value`].
pub fn encode_value(value: &serde_json::Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.push(ETF_VERSION);
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &serde_json::Value) {
    use serde_json::Value;

    match value {
        Value::Null => write_atom(out, "nil"),
        Value::Bool(true) => write_atom(out, "true"),
        Value::Bool(false) => write_atom(out, "false"),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                write_unsigned(out, u);
            } else if let Some(i) = n.as_i64() {
                write_signed(out, i);
            } else {
                out.push(tags::NEW_FLOAT);
                out.extend_from_slice(&n.as_f64().unwrap_or(0.0).to_be_bytes());
            }
        }
        Value::String(s) => {
            out.push(tags::BINARY);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.push(tags::NIL);
            } else {
                out.push(tags::LIST);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    write_value(out, item);
                }
                out.push(tags::NIL);
            }
        }
        Value::Object(map) => {
            out.push(tags::MAP);
            out.extend_from_slice(&(map.len() as u32).to_be_bytes());
            for (key, item) in map {
                out.push(tags::BINARY);
                out.extend_from_slice(&(key.len() as u32).to_be_bytes());
                out.extend_from_slice(key.as_bytes());
                write_value(out, item);
            }
        }
    }
}

fn write_atom(out: &mut Vec<u8>, name: &str) {
    out.push(tags::SMALL_ATOM_UTF8);
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
}

fn write_unsigned(out: &mut Vec<u8>, value: u64) {
    if value <= u8::MAX as u64 {
        out.push(tags::SMALL_INTEGER);
        out.push(value as u8);
    } else if value <= i32::MAX as u64 {
        out.push(tags::INTEGER);
        out.extend_from_slice(&(value as i32).to_be_bytes());
    } else {
        // Little-endian magnitude with the trailing zero bytes trimmed.
        let bytes = value.to_le_bytes();
        let len = 8 - bytes.iter().rev().take_while(|b| **b == 0).count();
        out.push(tags::SMALL_BIG);
        out.push(len as u8);
        out.push(0);
        out.extend_from_slice(&bytes[..len]);
    }
}

fn write_signed(out: &mut Vec<u8>, value: i64) {
    if (i32::MIN as i64..=i32::MAX as i64).contains(&value) {
        out.push(tags::INTEGER);
        out.extend_from_slice(&(value as i32).to_be_bytes());
    } else {
        let magnitude = value.unsigned_abs();
        let bytes = magnitude.to_le_bytes();
        let len = 8 - bytes.iter().rev().take_while(|b| **b == 0).count();
        out.push(tags::SMALL_BIG);
        out.push(len as u8);
        out.push(u8::from(value < 0));
        out.extend_from_slice(&bytes[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(value: serde_json::Value) -> serde_json::Value {
        let encoded = encode_value(&value);
        let term = EtfDecoder::decode(&encoded).unwrap();
        term_to_value(&term).unwrap()
    }

    #[test]
    fn test_decode_small_int() {
        let data = [131, 97, 42];
        assert_eq!(EtfDecoder::decode(&data).unwrap(), EtfTerm::SmallInt(42));
    }

    #[test]
    fn test_decode_integer() {
        let data = [131, 98, 0, 0, 1, 0];
        assert_eq!(EtfDecoder::decode(&data).unwrap(), EtfTerm::Int(256));
    }

    #[test]
    fn test_decode_nil_and_atoms() {
        assert_eq!(EtfDecoder::decode(&[131, 106]).unwrap(), EtfTerm::Nil);

        let data = [131, 119, 4, b't', b'r', b'u', b'e'];
        assert_eq!(
            EtfDecoder::decode(&data).unwrap(),
            EtfTerm::Atom("true".to_owned())
        );
    }

    #[test]
    fn test_decode_binary() {
        let data = [131, 109, 0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o'];
        assert_eq!(
            EtfDecoder::decode(&data).unwrap(),
            EtfTerm::Binary(b"hello".to_vec())
        );
    }

    #[test]
    fn test_decode_map_to_value() {
        let data = [
            131, // version
            116, // map
            0, 0, 0, 1, // arity 1
            119, 2, b'o', b'p', // small_atom_utf8 "op"
            97, 10, // small_integer 10
        ];
        let term = EtfDecoder::decode(&data).unwrap();
        let value = term_to_value(&term).unwrap();
        assert_eq!(value["op"], 10);
    }

    #[test]
    fn test_invalid_version_rejected() {
        assert!(EtfDecoder::decode(&[130, 97, 1]).is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        assert!(EtfDecoder::decode(&[131, 109, 0, 0, 0, 9, b'x']).is_err());
    }

    #[test]
    fn test_encode_round_trip_packet() {
        let value = json!({"op": 1, "d": 42});
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn test_encode_round_trip_nested() {
        let value = json!({
            "op": 2,
            "d": {
                "token": "abc",
                "shard": [0, 1],
                "compress": false,
                "large_threshold": 250
            }
        });
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn test_encode_round_trip_null_and_empty_list() {
        let value = json!({"d": null, "activities": []});
        let result = round_trip(value);
        assert!(result["d"].is_null());
        // Nil decodes as null; both array shapes are accepted upstream.
        assert!(result["activities"].is_null() || result["activities"] == json!([]));
    }

    #[test]
    fn test_encode_big_integer() {
        let value = json!({"seq": 175928847299117063u64});
        assert_eq!(round_trip(value.clone()), value);
    }
}
