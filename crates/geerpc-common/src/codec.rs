//! The named codec table.
//!
//! A codec turns typed values into frame payloads and back. Codecs are
//! looked up by name during the connection handshake; both peers must
//! resolve the same name to the same encoding. The enum is the extension
//! point for additional formats (e.g. MessagePack, CBOR).

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Name of the JSON codec.
pub const JSON_CODEC: &str = "application/json";

/// Name of the reference binary codec.
pub const BINARY_CODEC: &str = "application/postcard";

/// Encoding used for all header and body frames on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCodec {
    /// Human-readable JSON, for debugging and tooling.
    Json,
    /// Postcard: compact binary format, the default.
    Postcard,
}

impl WireCodec {
    /// Resolves a codec by its registered name.
    ///
    /// Returns `None` for names no codec is registered under; the caller
    /// decides whether that is a handshake rejection (server) or a dial
    /// error (client).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            JSON_CODEC => Some(WireCodec::Json),
            BINARY_CODEC => Some(WireCodec::Postcard),
            _ => None,
        }
    }

    /// The name this codec is registered under.
    pub fn name(&self) -> &'static str {
        match self {
            WireCodec::Json => JSON_CODEC,
            WireCodec::Postcard => BINARY_CODEC,
        }
    }

    /// Encodes a value into a frame payload.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            WireCodec::Json => Ok(serde_json::to_vec(value)?),
            WireCodec::Postcard => Ok(postcard::to_allocvec(value)?),
        }
    }

    /// Decodes a frame payload into a value.
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            WireCodec::Json => Ok(serde_json::from_slice(data)?),
            WireCodec::Postcard => Ok(postcard::from_bytes(data)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Header;

    #[test]
    fn test_from_name_resolves_registered_codecs() {
        assert_eq!(WireCodec::from_name("application/json"), Some(WireCodec::Json));
        assert_eq!(
            WireCodec::from_name("application/postcard"),
            Some(WireCodec::Postcard)
        );
        assert_eq!(WireCodec::from_name("application/gob"), None);
        assert_eq!(WireCodec::from_name(""), None);
    }

    #[test]
    fn test_name_round_trips_through_from_name() {
        for codec in [WireCodec::Json, WireCodec::Postcard] {
            assert_eq!(WireCodec::from_name(codec.name()), Some(codec));
        }
    }

    #[test]
    fn test_header_survives_both_codecs() {
        let header = Header {
            service_method: "Arith.Multiply".to_string(),
            seq: 42,
            error: "rpc: method not found: Arith.Multiply".to_string(),
        };
        for codec in [WireCodec::Json, WireCodec::Postcard] {
            let bytes = codec.encode(&header).unwrap();
            let decoded: Header = codec.decode(&bytes).unwrap();
            assert_eq!(header, decoded);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let garbage = b"\xff\xfe not a frame";
        assert!(WireCodec::Json.decode::<Header>(garbage).is_err());
        assert!(WireCodec::Postcard.decode::<Header>(garbage).is_err());
    }
}
