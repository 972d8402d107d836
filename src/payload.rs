//! Opaque protobuf payloads
//!
//! The bridge never interprets message fields. A [`Payload`] is the encoded
//! message exactly as the host produced it, accepted only after its protobuf
//! wire format has been walked end to end. Unknown fields survive untouched
//! because nothing is ever decoded into a concrete type.

use bytes::{Buf, Bytes};
use prost::encoding::decode_varint;

use crate::error::{BridgeError, Result};

const MAX_GROUP_DEPTH: usize = 100;

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LENGTH_DELIMITED: u64 = 2;
const WIRE_START_GROUP: u64 = 3;
const WIRE_END_GROUP: u64 = 4;
const WIRE_FIXED32: u64 = 5;

/// A validated, encoded protobuf message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    bytes: Bytes,
}

impl Payload {
    /// The empty message (every field at its default)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate `bytes` as protobuf wire format and copy them into a payload
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        validate_wire_format(bytes)?;
        Ok(Self {
            bytes: Bytes::copy_from_slice(bytes),
        })
    }

    /// Parse `bytes`, substituting the empty message when they are malformed
    pub fn parse_lenient(bytes: &[u8]) -> Self {
        match Self::parse(bytes) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(len = bytes.len(), "{}; sending the empty message instead", e);
                Self::empty()
            }
        }
    }

    /// Wrap bytes received from the transport without validation
    pub(crate) fn from_wire(bytes: Bytes) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

/// Walk every field of an encoded message without decoding its values
pub fn validate_wire_format(bytes: &[u8]) -> Result<()> {
    let mut buf = bytes;
    let mut open_groups: Vec<u32> = Vec::new();

    while buf.has_remaining() {
        let offset = bytes.len() - buf.remaining();
        let key = decode_varint(&mut buf)?;
        if key > u64::from(u32::MAX) {
            return Err(malformed(offset, format!("field key {} out of range", key)));
        }
        let tag = (key >> 3) as u32;
        let wire_type = key & 0x7;
        if tag == 0 {
            return Err(malformed(offset, "field number 0"));
        }

        match wire_type {
            WIRE_VARINT => {
                decode_varint(&mut buf)?;
            }
            WIRE_FIXED64 => skip(&mut buf, 8, offset)?,
            WIRE_FIXED32 => skip(&mut buf, 4, offset)?,
            WIRE_LENGTH_DELIMITED => {
                let len = decode_varint(&mut buf)?;
                let len = usize::try_from(len)
                    .map_err(|_| malformed(offset, "length does not fit in memory"))?;
                skip(&mut buf, len, offset)?;
            }
            WIRE_START_GROUP => {
                if open_groups.len() >= MAX_GROUP_DEPTH {
                    return Err(malformed(offset, "groups nested too deeply"));
                }
                open_groups.push(tag);
            }
            WIRE_END_GROUP => match open_groups.pop() {
                Some(open) if open == tag => {}
                _ => return Err(malformed(offset, format!("unexpected end of group {}", tag))),
            },
            other => {
                return Err(malformed(offset, format!("invalid wire type {}", other)));
            }
        }
    }

    if let Some(tag) = open_groups.last() {
        return Err(malformed(bytes.len(), format!("group {} never closed", tag)));
    }
    Ok(())
}

fn skip(buf: &mut &[u8], len: usize, offset: usize) -> Result<()> {
    if buf.remaining() < len {
        return Err(malformed(
            offset,
            format!("field needs {} bytes, {} left", len, buf.remaining()),
        ));
    }
    buf.advance(len);
    Ok(())
}

fn malformed(offset: usize, reason: impl std::fmt::Display) -> BridgeError {
    BridgeError::MalformedPayload(format!("{} at byte {}", reason, offset))
}
