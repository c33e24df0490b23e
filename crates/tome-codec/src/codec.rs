use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

/// Encodes and decodes serde values to and from byte streams.
///
/// Implementations must be deterministic: encoding the same value twice
/// yields identical bytes. The registry dirty check relies on this.
pub trait Codec {
    /// Short name used in error messages and diagnostics.
    fn name(&self) -> &'static str;

    /// Encode `value` into `writer`.
    fn encode_into<W: Write, T: Serialize + ?Sized>(&self, writer: W, value: &T)
        -> CodecResult<()>;

    /// Decode a value from `reader`.
    fn decode_from<R: Read, T: DeserializeOwned>(&self, reader: R) -> CodecResult<T>;

    /// Encode `value` into a fresh buffer.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf, value)?;
        Ok(buf)
    }

    /// Decode a value from a byte slice.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        self.decode_from(bytes)
    }
}

/// Compact binary encoding (bincode 1, fixed-width integers).
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode_into<W: Write, T: Serialize + ?Sized>(
        &self,
        writer: W,
        value: &T,
    ) -> CodecResult<()> {
        bincode::serialize_into(writer, value).map_err(|e| CodecError::Serialization {
            codec: self.name(),
            reason: e.to_string(),
        })
    }

    fn decode_from<R: Read, T: DeserializeOwned>(&self, reader: R) -> CodecResult<T> {
        bincode::deserialize_from(reader).map_err(|e| CodecError::Deserialization {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}

/// Human-readable JSON encoding, handy when block contents are inspected by hand.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode_into<W: Write, T: Serialize + ?Sized>(
        &self,
        writer: W,
        value: &T,
    ) -> CodecResult<()> {
        serde_json::to_writer(writer, value).map_err(|e| CodecError::Serialization {
            codec: self.name(),
            reason: e.to_string(),
        })
    }

    fn decode_from<R: Read, T: DeserializeOwned>(&self, reader: R) -> CodecResult<T> {
        serde_json::from_reader(reader).map_err(|e| CodecError::Deserialization {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}

/// The codec a database uses for instance objects.
///
/// Persisted in the registry so a reopened database decodes objects the
/// same way they were written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecKind {
    #[default]
    Bincode,
    Json,
}

impl Codec for CodecKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Bincode => BincodeCodec.name(),
            Self::Json => JsonCodec.name(),
        }
    }

    fn encode_into<W: Write, T: Serialize + ?Sized>(
        &self,
        writer: W,
        value: &T,
    ) -> CodecResult<()> {
        match self {
            Self::Bincode => BincodeCodec.encode_into(writer, value),
            Self::Json => JsonCodec.encode_into(writer, value),
        }
    }

    fn decode_from<R: Read, T: DeserializeOwned>(&self, reader: R) -> CodecResult<T> {
        match self {
            Self::Bincode => BincodeCodec.decode_from(reader),
            Self::Json => JsonCodec.decode_from(reader),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" => Ok(Self::Bincode),
            "json" => Ok(Self::Json),
            other => Err(CodecError::UnknownCodec(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Mesh {
        name: String,
        vertices: Vec<[f32; 3]>,
        tags: BTreeMap<String, u32>,
    }

    fn sample() -> Mesh {
        let mut tags = BTreeMap::new();
        tags.insert("lod".to_string(), 2);
        tags.insert("layer".to_string(), 7);
        Mesh {
            name: "cube".into(),
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.5, 0.25]],
            tags,
        }
    }

    #[test]
    fn bincode_roundtrip() {
        let bytes = BincodeCodec.encode(&sample()).unwrap();
        let back: Mesh = BincodeCodec.decode(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn json_roundtrip_is_readable() {
        let bytes = JsonCodec.encode(&sample()).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"cube\""));
        let back: Mesh = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn encoding_is_deterministic() {
        for kind in [CodecKind::Bincode, CodecKind::Json] {
            assert_eq!(kind.encode(&sample()).unwrap(), kind.encode(&sample()).unwrap());
        }
    }

    #[test]
    fn kind_dispatches_to_matching_codec() {
        let via_kind = CodecKind::Json.encode(&sample()).unwrap();
        let direct = JsonCodec.encode(&sample()).unwrap();
        assert_eq!(via_kind, direct);
    }

    #[test]
    fn decode_garbage_fails() {
        let err = BincodeCodec.decode::<Mesh>(&[0xff, 0x01]).unwrap_err();
        assert!(matches!(err, CodecError::Deserialization { codec: "bincode", .. }));
        let err = JsonCodec.decode::<Mesh>(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Deserialization { codec: "json", .. }));
    }

    #[test]
    fn encode_into_streams_to_writer() {
        let mut out = Vec::new();
        CodecKind::Bincode.encode_into(&mut out, "streamed").unwrap();
        let back: String = CodecKind::Bincode.decode_from(out.as_slice()).unwrap();
        assert_eq!(back, "streamed");
    }

    #[test]
    fn kind_parse_and_display() {
        assert_eq!("JSON".parse::<CodecKind>().unwrap(), CodecKind::Json);
        assert_eq!(CodecKind::Bincode.to_string(), "bincode");
        assert!(matches!(
            "yaml".parse::<CodecKind>(),
            Err(CodecError::UnknownCodec(_))
        ));
    }
}
