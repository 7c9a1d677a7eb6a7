//! Primitive encoding/decoding for protobuf-framed payloads.
//!
//! Implements varint, signed varint (zigzag), field tags and
//! length-delimited fields.

use crate::error::DecodeError;

/// Maximum bytes in a 64-bit varint.
pub const MAX_VARINT_BYTES: usize = 10;

/// Protobuf wire type for varints.
pub const WIRE_VARINT: u8 = 0;
/// Protobuf wire type for 64-bit fixed values.
pub const WIRE_FIXED64: u8 = 1;
/// Protobuf wire type for length-delimited fields.
pub const WIRE_LEN: u8 = 2;
/// Protobuf wire type for 32-bit fixed values.
pub const WIRE_FIXED32: u8 = 5;

// =============================================================================
// DECODING
// =============================================================================

/// Reader for decoding binary data.
///
/// Wraps a byte slice and provides methods for reading primitives
/// with bounds checking and error handling.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a new reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns the current position in the data.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns true if all data has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Returns the unread tail.
    pub fn remaining(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or(&[])
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_byte(&mut self, context: &'static str) -> Result<u8, DecodeError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof { context })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Reads exactly n bytes.
    #[inline]
    pub fn read_bytes(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::UnexpectedEof { context })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Reads an unsigned varint (LEB128).
    #[inline]
    pub fn read_varint(&mut self, context: &'static str) -> Result<u64, DecodeError> {
        let mut result: u64 = 0;
        let mut shift = 0;

        for _ in 0..MAX_VARINT_BYTES {
            let byte = self.read_byte(context)?;
            let value = (byte & 0x7F) as u64;

            if shift == 63 && value > 1 {
                return Err(DecodeError::VarintOverflow);
            }

            result |= value << shift;

            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }

        Err(DecodeError::VarintTooLong)
    }

    /// Reads a signed varint (zigzag encoded).
    pub fn read_signed_varint(&mut self, context: &'static str) -> Result<i64, DecodeError> {
        let unsigned = self.read_varint(context)?;
        Ok(zigzag_decode(unsigned))
    }

    /// Reads a field tag, returning `(field_number, wire_type)`.
    pub fn read_tag(&mut self) -> Result<(u32, u8), DecodeError> {
        let key = self.read_varint("field tag")?;
        Ok(((key >> 3) as u32, (key & 0x7) as u8))
    }

    /// Reads a length-prefixed byte slice.
    pub fn read_len_delimited(
        &mut self,
        max_len: usize,
        field: &'static str,
    ) -> Result<&'a [u8], DecodeError> {
        let len = self.read_varint(field)? as usize;
        if len > max_len {
            return Err(DecodeError::LengthExceedsLimit {
                field,
                len,
                max: max_len,
            });
        }
        self.read_bytes(len, field)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(
        &mut self,
        max_len: usize,
        field: &'static str,
    ) -> Result<String, DecodeError> {
        let bytes = self.read_len_delimited(max_len, field)?;
        std::str::from_utf8(bytes)
            .map(|s| s.to_string())
            .map_err(|_| DecodeError::InvalidUtf8 { field })
    }

    /// Reads a little-endian f64.
    pub fn read_f64(&mut self, context: &'static str) -> Result<f64, DecodeError> {
        let bytes = self.read_bytes(8, context)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    /// Reads a little-endian f32.
    pub fn read_f32(&mut self, context: &'static str) -> Result<f32, DecodeError> {
        let bytes = self.read_bytes(4, context)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(f32::from_le_bytes(raw))
    }

    /// Reads a packed repeated varint field body.
    pub fn read_packed_varints(
        &mut self,
        max_len: usize,
        field: &'static str,
    ) -> Result<Vec<u32>, DecodeError> {
        let body = self.read_len_delimited(max_len, field)?;
        let mut inner = Reader::new(body);
        let mut out = Vec::new();
        while !inner.is_empty() {
            out.push(inner.read_varint(field)? as u32);
        }
        Ok(out)
    }

    /// Skips a field of the given wire type.
    pub fn skip(&mut self, field: u32, wire_type: u8) -> Result<(), DecodeError> {
        match wire_type {
            WIRE_VARINT => self.read_varint("skipped field").map(|_| ()),
            WIRE_FIXED64 => self.read_bytes(8, "skipped field").map(|_| ()),
            WIRE_LEN => self
                .read_len_delimited(usize::MAX, "skipped field")
                .map(|_| ()),
            WIRE_FIXED32 => self.read_bytes(4, "skipped field").map(|_| ()),
            _ => Err(DecodeError::InvalidWireType { field, wire_type }),
        }
    }
}

// =============================================================================
// ENCODING
// =============================================================================

/// Writer for encoding binary data.
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Creates a new writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Creates a new writer with capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Returns the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns a reference to the written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Writes raw bytes.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes an unsigned varint (LEB128).
    #[inline]
    pub fn write_varint(&mut self, mut value: u64) {
        let mut buf = [0u8; MAX_VARINT_BYTES];
        let mut len = 0;
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            buf[len] = byte;
            len += 1;
            if value == 0 {
                break;
            }
        }
        self.buf.extend_from_slice(&buf[..len]);
    }

    /// Writes a signed varint (zigzag encoded).
    pub fn write_signed_varint(&mut self, value: i64) {
        self.write_varint(zigzag_encode(value));
    }

    /// Writes a field tag.
    #[inline]
    pub fn write_tag(&mut self, field: u32, wire_type: u8) {
        self.write_varint(((field as u64) << 3) | wire_type as u64);
    }

    /// Writes a varint field.
    pub fn write_varint_field(&mut self, field: u32, value: u64) {
        self.write_tag(field, WIRE_VARINT);
        self.write_varint(value);
    }

    /// Writes a zigzag varint field.
    pub fn write_sint_field(&mut self, field: u32, value: i64) {
        self.write_tag(field, WIRE_VARINT);
        self.write_signed_varint(value);
    }

    /// Writes a length-delimited bytes field.
    pub fn write_bytes_field(&mut self, field: u32, bytes: &[u8]) {
        self.write_tag(field, WIRE_LEN);
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a length-delimited string field.
    pub fn write_string_field(&mut self, field: u32, s: &str) {
        self.write_bytes_field(field, s.as_bytes());
    }

    /// Writes a fixed64 double field.
    pub fn write_double_field(&mut self, field: u32, value: f64) {
        self.write_tag(field, WIRE_FIXED64);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a packed repeated varint field. Empty slices are omitted.
    pub fn write_packed_field(&mut self, field: u32, values: &[u32]) {
        if values.is_empty() {
            return;
        }
        let mut body = Writer::with_capacity(values.len() * 2);
        for v in values {
            body.write_varint(*v as u64);
        }
        self.write_bytes_field(field, body.as_bytes());
    }
}

// =============================================================================
// ZIGZAG ENCODING
// =============================================================================

/// Encodes a signed integer using zigzag encoding.
///
/// Maps negative numbers to odd positive numbers:
/// 0 -> 0, -1 -> 1, 1 -> 2, -2 -> 3, 2 -> 4, ...
#[inline]
pub fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Decodes a zigzag-encoded unsigned integer back to signed.
#[inline]
pub fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ (-((n & 1) as i64))
}
