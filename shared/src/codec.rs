//! Byte-level primitives for the wire protocol
//!
//! All integers are little-endian and fixed width. Strings carry a `u16` byte
//! length, lists a `u16` element count and blobs a `u32` byte length. Enums
//! travel as a single `u8`, optionals as a presence byte followed by the value.

use thiserror::Error;

/// Errors raised while decoding a packet body
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of packet: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid {kind} value {value}")]
    InvalidEnum { kind: &'static str, value: u8 },

    #[error("invalid escape sequence at offset {0}")]
    InvalidEscape(usize),

    #[error("field of {0} bytes exceeds the length prefix")]
    TooLong(usize),
}

/// Cursor over a decoded frame body
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEnd {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..start + len])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Reads a count-prefixed list, decoding each element with `read`
    pub fn read_list<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, CodecError>,
    ) -> Result<Vec<T>, CodecError> {
        let count = self.read_u16()? as usize;
        // Every element takes at least one byte, so a bogus count fails fast
        if count > self.remaining() {
            return Err(CodecError::UnexpectedEnd {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }
}

/// Growable buffer that packets serialize themselves into
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    data: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    /// Writes a length-prefixed string, truncating at a char boundary if it
    /// would overflow the `u16` prefix
    pub fn write_string(&mut self, value: &str) {
        let mut end = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.write_u16(end as u16);
        self.write_bytes(&value.as_bytes()[..end]);
    }

    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    /// Writes a count-prefixed list; elements past `u16::MAX` are dropped
    pub fn write_list<T>(&mut self, items: &[T], mut write: impl FnMut(&mut Self, &T)) {
        let count = items.len().min(u16::MAX as usize);
        self.write_u16(count as u16);
        for item in &items[..count] {
            write(self, item);
        }
    }
}

/// A value that knows its own wire layout
///
/// Implemented for the primitive field types so packet definitions can be
/// plain structs.
pub trait WireField: Sized {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError>;
    fn write_field(&self, writer: &mut PacketWriter);
}

impl WireField for u8 {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_u8()
    }
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_u8(*self);
    }
}

impl WireField for u16 {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_u16()
    }
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_u16(*self);
    }
}

impl WireField for u32 {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_u32()
    }
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_u32(*self);
    }
}

impl WireField for u64 {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_u64()
    }
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_u64(*self);
    }
}

impl WireField for i32 {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_i32()
    }
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_i32(*self);
    }
}

impl WireField for bool {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_bool()
    }
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_bool(*self);
    }
}

impl WireField for String {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_string()
    }
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_string(self);
    }
}

impl<T: WireField> WireField for Vec<T> {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_list(T::read_field)
    }
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_list(self, |w, item| item.write_field(w));
    }
}

impl<T: WireField> WireField for Option<T> {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        if reader.read_bool()? {
            Ok(Some(T::read_field(reader)?))
        } else {
            Ok(None)
        }
    }
    fn write_field(&self, writer: &mut PacketWriter) {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.write_field(writer);
            }
            None => writer.write_bool(false),
        }
    }
}

/// Opaque byte payload, encoded with a `u32` length prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

impl WireField for Blob {
    fn read_field(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Blob(reader.read_blob()?))
    }
    fn write_field(&self, writer: &mut PacketWriter) {
        writer.write_blob(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_layout_is_little_endian() {
        let mut writer = PacketWriter::new();
        writer.write_u16(0x0102);
        writer.write_u32(0x03040506);
        assert_eq!(writer.as_slice(), &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn test_mixed_fields_read_back() {
        let mut writer = PacketWriter::new();
        writer.write_u8(7);
        writer.write_i32(-42);
        writer.write_u64(u64::MAX - 1);
        writer.write_bool(true);
        writer.write_string("Ferrum");
        writer.write_blob(&[0x7e, 0x7d, 0x00]);

        let mut reader = PacketReader::new(writer.as_slice());
        assert_eq!(reader.read_u8(), Ok(7));
        assert_eq!(reader.read_i32(), Ok(-42));
        assert_eq!(reader.read_u64(), Ok(u64::MAX - 1));
        assert_eq!(reader.read_bool(), Ok(true));
        assert_eq!(reader.read_string().as_deref(), Ok("Ferrum"));
        assert_eq!(reader.read_blob(), Ok(vec![0x7e, 0x7d, 0x00]));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_truncated_read_reports_shortfall() {
        let mut reader = PacketReader::new(&[0x01, 0x02]);
        assert_eq!(
            reader.read_u32(),
            Err(CodecError::UnexpectedEnd {
                needed: 4,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let mut reader = PacketReader::new(&[0x02, 0x00, 0xff, 0xfe]);
        assert_eq!(reader.read_string(), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn test_list_with_bogus_count_fails_fast() {
        let mut reader = PacketReader::new(&[0xff, 0xff, 0x01]);
        assert!(reader.read_list(|r| r.read_u8()).is_err());
    }

    #[test]
    fn test_list_and_option_fields() {
        let values: Vec<Option<u16>> = vec![Some(3), None, Some(65535)];
        let mut writer = PacketWriter::new();
        values.write_field(&mut writer);

        let mut reader = PacketReader::new(writer.as_slice());
        let decoded = Vec::<Option<u16>>::read_field(&mut reader).unwrap();
        assert_eq!(decoded, values);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_long_string_truncates_on_char_boundary() {
        let text = "é".repeat(40_000);
        let mut writer = PacketWriter::new();
        writer.write_string(&text);

        let mut reader = PacketReader::new(writer.as_slice());
        let decoded = reader.read_string().unwrap();
        assert!(decoded.len() <= u16::MAX as usize);
        assert!(decoded.chars().all(|c| c == 'é'));
    }
}
