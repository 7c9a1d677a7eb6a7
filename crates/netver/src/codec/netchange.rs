//! Netchange documents and bundles.
//!
//! A netchange document is the JSON form of one changeset-to-be: the
//! header fields needed to create it plus its operations. Diffing yields
//! one document per project; documents travel alone or packed in a
//! bundle.
//!
//! Bundle layout:
//! - Uncompressed: `NVC1` magic, varint document count, then each document
//!   as a varint length followed by its JSON bytes.
//! - Compressed: `NVC1Z` magic, varint uncompressed size, then the zstd
//!   frame of the whole uncompressed bundle.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::codec::primitives::{Reader, Writer};
use crate::error::{DecodeError, EncodeError};
use crate::model::{ChangesetId, ChangesetMeta, Operation};

/// Magic bytes of an uncompressed bundle.
pub const MAGIC_UNCOMPRESSED: &[u8; 4] = b"NVC1";
/// Magic bytes of a zstd-compressed bundle.
pub const MAGIC_COMPRESSED: &[u8; 5] = b"NVC1Z";

/// Changeset header of a netchange document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesetHeader {
    pub base_network: ChangesetId,
    #[serde(default)]
    pub depends_on: Vec<ChangesetId>,
    #[serde(default)]
    pub pid: Option<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub editor: String,
    /// Microseconds since the Unix epoch, RFC 3339 on the wire.
    #[serde(with = "rfc3339")]
    pub created_at: i64,
}

impl ChangesetHeader {
    /// Metadata for creating the changeset this header describes.
    pub fn meta(&self) -> ChangesetMeta {
        ChangesetMeta {
            user: self.user.clone(),
            comment: self.comment.clone(),
            project_id: self.pid.clone(),
            editor: self.editor.clone(),
            auth_area: String::new(),
        }
    }
}

/// One changeset's worth of operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetChange {
    pub changeset: ChangesetHeader,
    pub operations: Vec<Operation>,
}

mod rfc3339 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::util::{format_timestamp, parse_timestamp};

    pub fn serialize<S: Serializer>(micros: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(*micros))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).map_err(D::Error::custom)
    }
}

/// Serializes a document to JSON.
pub fn encode_netchange(doc: &NetChange) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(doc).map_err(|e| EncodeError::Json(e.to_string()))
}

/// Parses a JSON document.
pub fn decode_netchange(input: &[u8]) -> Result<NetChange, DecodeError> {
    serde_json::from_slice(input).map_err(|e| DecodeError::Json(e.to_string()))
}

/// Packs documents into an uncompressed bundle.
pub fn encode_bundle(docs: &[NetChange]) -> Result<Vec<u8>, EncodeError> {
    let mut writer = Writer::new();
    writer.write_bytes(MAGIC_UNCOMPRESSED);
    writer.write_varint(docs.len() as u64);
    for doc in docs {
        let json = encode_netchange(doc)?;
        writer.write_varint(json.len() as u64);
        writer.write_bytes(&json);
    }
    Ok(writer.into_bytes())
}

/// Packs documents into a zstd-compressed bundle.
pub fn encode_bundle_compressed(docs: &[NetChange], level: i32) -> Result<Vec<u8>, EncodeError> {
    let uncompressed = encode_bundle(docs)?;
    let compressed = zstd::encode_all(uncompressed.as_slice(), level)
        .map_err(|e| EncodeError::CompressionFailed(e.to_string()))?;

    let mut writer = Writer::with_capacity(MAGIC_COMPRESSED.len() + 10 + compressed.len());
    writer.write_bytes(MAGIC_COMPRESSED);
    writer.write_varint(uncompressed.len() as u64);
    writer.write_bytes(&compressed);
    Ok(writer.into_bytes())
}

/// Decodes a bundle in either layout. `max_size` bounds the uncompressed
/// bundle size.
pub fn decode_bundle(input: &[u8], max_size: usize) -> Result<Vec<NetChange>, DecodeError> {
    if input.starts_with(MAGIC_COMPRESSED) {
        let uncompressed = decompress(&input[MAGIC_COMPRESSED.len()..], max_size)?;
        if !uncompressed.starts_with(MAGIC_UNCOMPRESSED)
            || uncompressed.starts_with(MAGIC_COMPRESSED)
        {
            return Err(DecodeError::InvalidMagic {
                found: uncompressed.iter().take(5).copied().collect(),
            });
        }
        return decode_documents(&uncompressed[MAGIC_UNCOMPRESSED.len()..]);
    }
    if input.starts_with(MAGIC_UNCOMPRESSED) {
        if input.len() > max_size {
            return Err(DecodeError::LengthExceedsLimit {
                field: "bundle",
                len: input.len(),
                max: max_size,
            });
        }
        return decode_documents(&input[MAGIC_UNCOMPRESSED.len()..]);
    }
    if input.len() < MAGIC_UNCOMPRESSED.len() {
        return Err(DecodeError::UnexpectedEof { context: "magic" });
    }
    Err(DecodeError::InvalidMagic {
        found: input.iter().take(5).copied().collect(),
    })
}

fn decode_documents(body: &[u8]) -> Result<Vec<NetChange>, DecodeError> {
    let mut reader = Reader::new(body);
    let count = reader.read_varint("document count")? as usize;
    // Every document needs at least its length byte.
    if count > body.len() {
        return Err(DecodeError::LengthExceedsLimit {
            field: "document count",
            len: count,
            max: body.len(),
        });
    }
    let mut docs = Vec::with_capacity(count);
    for _ in 0..count {
        let json = reader.read_len_delimited(body.len(), "document")?;
        docs.push(decode_netchange(json)?);
    }
    Ok(docs)
}

fn decompress(compressed: &[u8], max_size: usize) -> Result<Vec<u8>, DecodeError> {
    let mut reader = Reader::new(compressed);
    let declared = reader.read_varint("uncompressed size")? as usize;
    if declared > max_size {
        return Err(DecodeError::LengthExceedsLimit {
            field: "uncompressed size",
            len: declared,
            max: max_size,
        });
    }

    let decoder = zstd::Decoder::new(reader.remaining())
        .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;
    let mut out = Vec::with_capacity(declared);
    decoder
        .take(declared as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;

    if out.len() != declared {
        return Err(DecodeError::DecompressionFailed(format!(
            "declared {declared} bytes, got {}",
            out.len()
        )));
    }
    Ok(out)
}
