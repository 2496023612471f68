// BER primitive reader and writer used by the LDAP protocol codec.
// Reads are tag-agnostic: callers peek the tag where the grammar needs it.

use crate::error::BerError;
use std::io::{Cursor, Read};

pub const UNIVERSAL_BOOLEAN_TYPE: u8 = 0x01;
pub const UNIVERSAL_INTEGER_TYPE: u8 = 0x02;
pub const UNIVERSAL_OCTET_STRING_TYPE: u8 = 0x04;
pub const UNIVERSAL_NULL_TYPE: u8 = 0x05;
pub const UNIVERSAL_ENUMERATED_TYPE: u8 = 0x0A;
pub const UNIVERSAL_SEQUENCE_TYPE: u8 = 0x30;
pub const UNIVERSAL_SET_TYPE: u8 = 0x31;

/// Maximum number of length bytes accepted in long form.
const MAX_LENGTH_BYTES: usize = 4;

/// Reader over one in-memory BER encoded buffer.
///
/// `read_start_sequence` narrows the readable window to the sequence content
/// until the matching `read_end_sequence`, so `has_next_element` answers for
/// the innermost open sequence.
#[derive(Debug)]
pub struct BerReader<'a> {
    cursor: Cursor<&'a [u8]>,
    /// Absolute end offsets of the open sequences, innermost last.
    limits: Vec<usize>,
}

impl<'a> BerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            limits: Vec::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn limit(&self) -> usize {
        self.limits
            .last()
            .copied()
            .unwrap_or_else(|| self.cursor.get_ref().len())
    }

    /// Bytes left in the innermost open sequence (or the whole buffer).
    pub fn remaining(&self) -> usize {
        self.limit().saturating_sub(self.position())
    }

    pub fn has_next_element(&self) -> bool {
        self.remaining() > 0
    }

    /// Tag of the next element, without consuming it.
    pub fn peek_type(&self) -> Result<u8, BerError> {
        if !self.has_next_element() {
            return Err(BerError::Truncated {
                needed: 1,
                remaining: 0,
            });
        }
        Ok(self.cursor.get_ref()[self.position()])
    }

    /// Content length of the next element, without consuming it.
    pub fn peek_length(&self) -> Result<usize, BerError> {
        let data = &self.cursor.get_ref()[..self.limit()];
        let (length, _) = decode_length(&data[self.position().min(data.len())..], 1)?;
        Ok(length)
    }

    fn read_byte(&mut self) -> Result<u8, BerError> {
        if self.remaining() < 1 {
            return Err(BerError::Truncated {
                needed: 1,
                remaining: 0,
            });
        }
        let mut buf = [0u8; 1];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| BerError::Truncated {
                needed: 1,
                remaining: 0,
            })?;
        Ok(buf[0])
    }

    fn read_length(&mut self) -> Result<usize, BerError> {
        let first_byte = self.read_byte()?;
        if (first_byte & 0x80) == 0 {
            return Ok(first_byte as usize);
        }
        let length_bytes = (first_byte & 0x7F) as usize;
        if length_bytes == 0 {
            return Err(BerError::IndefiniteLength);
        }
        if length_bytes > MAX_LENGTH_BYTES {
            return Err(BerError::LengthTooLarge(length_bytes));
        }
        if self.remaining() < length_bytes {
            return Err(BerError::Truncated {
                needed: length_bytes,
                remaining: self.remaining(),
            });
        }
        let mut length = 0usize;
        for _ in 0..length_bytes {
            length = (length << 8) | self.read_byte()? as usize;
        }
        Ok(length)
    }

    /// Read tag and length, checking the content fits in the current window.
    fn read_header(&mut self) -> Result<(u8, usize), BerError> {
        let tag = self.read_byte()?;
        let length = self.read_length()?;
        if self.remaining() < length {
            return Err(BerError::Truncated {
                needed: length,
                remaining: self.remaining(),
            });
        }
        Ok((tag, length))
    }

    fn read_content(&mut self, length: usize) -> Result<Vec<u8>, BerError> {
        let mut buf = vec![0u8; length];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| BerError::Truncated {
                needed: length,
                remaining: 0,
            })?;
        Ok(buf)
    }

    /// Enter a constructed element (SEQUENCE, SET or any application/context
    /// tagged constructed type).
    pub fn read_start_sequence(&mut self) -> Result<(), BerError> {
        let (_tag, length) = self.read_header()?;
        let end = self.position() + length;
        self.limits.push(end);
        Ok(())
    }

    /// Leave the innermost sequence. Unread trailing components are skipped.
    pub fn read_end_sequence(&mut self) -> Result<(), BerError> {
        let end = self.limits.pop().ok_or(BerError::NoOpenSequence)?;
        if self.position() < end {
            self.cursor.set_position(end as u64);
        }
        Ok(())
    }

    pub fn read_integer(&mut self) -> Result<i64, BerError> {
        let (_tag, length) = self.read_header()?;
        if length > 8 {
            return Err(BerError::IntegerTooLarge(length));
        }
        let buf = self.read_content(length)?;
        let mut value: i64 = 0;
        for &byte in &buf {
            value = (value << 8) | byte as i64;
        }
        if length > 0 && length < 8 && (buf[0] & 0x80) != 0 {
            value |= -1i64 << (length * 8);
        }
        Ok(value)
    }

    pub fn read_enumerated(&mut self) -> Result<i64, BerError> {
        self.read_integer()
    }

    pub fn read_boolean(&mut self) -> Result<bool, BerError> {
        let (_tag, length) = self.read_header()?;
        if length != 1 {
            return Err(BerError::InvalidBooleanLength(length));
        }
        Ok(self.read_byte()? != 0)
    }

    pub fn read_null(&mut self) -> Result<(), BerError> {
        let (_tag, length) = self.read_header()?;
        if length != 0 {
            return Err(BerError::InvalidNullLength(length));
        }
        Ok(())
    }

    pub fn read_octet_string(&mut self) -> Result<Vec<u8>, BerError> {
        let (_tag, length) = self.read_header()?;
        self.read_content(length)
    }

    pub fn read_octet_string_as_string(&mut self) -> Result<String, BerError> {
        let bytes = self.read_octet_string()?;
        String::from_utf8(bytes).map_err(|_| BerError::InvalidUtf8)
    }

    /// Skip the next element entirely (tag, length and content).
    pub fn skip_element(&mut self) -> Result<(), BerError> {
        let (_tag, length) = self.read_header()?;
        let pos = self.position() + length;
        self.cursor.set_position(pos as u64);
        Ok(())
    }
}

/// Decode a BER length starting at `data[offset]`. Returns the content length
/// and the number of bytes the length field took.
pub fn decode_length(data: &[u8], offset: usize) -> Result<(usize, usize), BerError> {
    let first_byte = *data.get(offset).ok_or(BerError::Truncated {
        needed: offset + 1,
        remaining: data.len(),
    })?;
    if (first_byte & 0x80) == 0 {
        return Ok((first_byte as usize, 1));
    }
    let length_bytes = (first_byte & 0x7F) as usize;
    if length_bytes == 0 {
        return Err(BerError::IndefiniteLength);
    }
    if length_bytes > MAX_LENGTH_BYTES {
        return Err(BerError::LengthTooLarge(length_bytes));
    }
    if data.len() < offset + 1 + length_bytes {
        return Err(BerError::Truncated {
            needed: offset + 1 + length_bytes,
            remaining: data.len(),
        });
    }
    let mut length = 0usize;
    for &b in &data[offset + 1..offset + 1 + length_bytes] {
        length = (length << 8) | b as usize;
    }
    Ok((length, 1 + length_bytes))
}

// BER encoding utilities
#[derive(Debug, Default)]
pub struct BerWriter {
    buffer: Vec<u8>,
    /// Offsets of the length placeholders of open sequences.
    open: Vec<usize>,
}

impl BerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_tag(&mut self, tag: u8) {
        self.buffer.push(tag);
    }

    fn write_length(&mut self, length: usize) {
        let encoded = encode_length(length);
        self.buffer.extend_from_slice(&encoded);
    }

    pub fn write_integer(&mut self, tag: u8, value: i64) {
        let bytes = value.to_be_bytes();
        // Drop redundant leading 0x00 / 0xFF bytes while keeping the sign bit.
        let mut start = 0;
        while start < bytes.len() - 1 {
            let b = bytes[start];
            let next_high = bytes[start + 1] & 0x80;
            if (b == 0x00 && next_high == 0) || (b == 0xFF && next_high != 0) {
                start += 1;
            } else {
                break;
            }
        }
        self.write_tag(tag);
        self.write_length(bytes.len() - start);
        self.buffer.extend_from_slice(&bytes[start..]);
    }

    pub fn write_enumerated(&mut self, value: i64) {
        self.write_integer(UNIVERSAL_ENUMERATED_TYPE, value);
    }

    pub fn write_boolean(&mut self, tag: u8, value: bool) {
        self.write_tag(tag);
        self.write_length(1);
        self.buffer.push(if value { 0xFF } else { 0x00 });
    }

    pub fn write_null(&mut self, tag: u8) {
        self.write_tag(tag);
        self.write_length(0);
    }

    pub fn write_octet_string(&mut self, tag: u8, data: &[u8]) {
        self.write_tag(tag);
        self.write_length(data.len());
        self.buffer.extend_from_slice(data);
    }

    /// Universal OCTET STRING holding UTF-8 text.
    pub fn write_string(&mut self, s: &str) {
        self.write_octet_string(UNIVERSAL_OCTET_STRING_TYPE, s.as_bytes());
    }

    /// Open a constructed element; content written until the matching
    /// `end_sequence` becomes its value.
    pub fn start_sequence(&mut self, tag: u8) {
        self.write_tag(tag);
        self.open.push(self.buffer.len());
        self.buffer.push(0); // placeholder for length
    }

    /// Close the innermost open element, back-patching its length.
    pub fn end_sequence(&mut self) -> Result<(), BerError> {
        let pos = self.open.pop().ok_or(BerError::NoOpenSequence)?;
        let content_len = self.buffer.len() - (pos + 1);
        let encoded = encode_length(content_len);
        self.buffer.splice(pos..pos + 1, encoded);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buffer
    }
}

fn encode_length(length: usize) -> Vec<u8> {
    if length < 128 {
        return vec![length as u8];
    }
    let mut bytes = Vec::new();
    let mut len = length;
    while len > 0 {
        bytes.push((len & 0xFF) as u8);
        len >>= 8;
    }
    bytes.reverse();
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(0x80 | bytes.len() as u8);
    out.extend_from_slice(&bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ber_reader_short_length() {
        let data = vec![0x04, 0x05, 0x68, 0x65, 0x6C, 0x6C, 0x6F]; // OCTET STRING "hello"
        let mut reader = BerReader::new(&data);
        assert_eq!(reader.read_octet_string().unwrap(), b"hello");
        assert!(!reader.has_next_element());
    }

    #[test]
    fn test_ber_reader_integer() {
        let data = vec![0x02, 0x01, 0x2A];
        let mut reader = BerReader::new(&data);
        assert_eq!(reader.read_integer().unwrap(), 42);
    }

    #[test]
    fn test_ber_reader_negative_integer() {
        let data = vec![0x02, 0x01, 0xFF];
        let mut reader = BerReader::new(&data);
        assert_eq!(reader.read_integer().unwrap(), -1);

        let data = vec![0x02, 0x02, 0xFF, 0x7F];
        let mut reader = BerReader::new(&data);
        assert_eq!(reader.read_integer().unwrap(), -129);
    }

    #[test]
    fn test_ber_reader_integer_too_large() {
        let data = vec![0x02, 0x09, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let mut reader = BerReader::new(&data);
        assert_eq!(reader.read_integer().unwrap_err(), BerError::IntegerTooLarge(9));
    }

    #[test]
    fn test_ber_reader_boolean() {
        let data = vec![0x01, 0x01, 0xFF, 0x01, 0x01, 0x00];
        let mut reader = BerReader::new(&data);
        assert!(reader.read_boolean().unwrap());
        assert!(!reader.read_boolean().unwrap());

        let data = vec![0x01, 0x02, 0xFF, 0xFF];
        let mut reader = BerReader::new(&data);
        assert_eq!(reader.read_boolean().unwrap_err(), BerError::InvalidBooleanLength(2));
    }

    #[test]
    fn test_ber_reader_sequence_window() {
        // SEQUENCE { INTEGER 42 } OCTET STRING "x"
        let data = vec![0x30, 0x03, 0x02, 0x01, 0x2A, 0x04, 0x01, b'x'];
        let mut reader = BerReader::new(&data);
        reader.read_start_sequence().unwrap();
        assert!(reader.has_next_element());
        assert_eq!(reader.read_integer().unwrap(), 42);
        assert!(!reader.has_next_element());
        reader.read_end_sequence().unwrap();
        assert!(reader.has_next_element());
        assert_eq!(reader.peek_type().unwrap(), UNIVERSAL_OCTET_STRING_TYPE);
        assert_eq!(reader.read_octet_string().unwrap(), b"x");
    }

    #[test]
    fn test_ber_reader_end_sequence_skips_trailing() {
        let data = vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02, 0x05, 0x00];
        let mut reader = BerReader::new(&data);
        reader.read_start_sequence().unwrap();
        assert_eq!(reader.read_integer().unwrap(), 1);
        reader.read_end_sequence().unwrap();
        reader.read_null().unwrap();
        assert!(!reader.has_next_element());
    }

    #[test]
    fn test_ber_reader_truncated_content() {
        let data = vec![0x04, 0x05, 0x68, 0x65];
        let mut reader = BerReader::new(&data);
        assert!(matches!(
            reader.read_octet_string(),
            Err(BerError::Truncated { needed: 5, .. })
        ));
    }

    #[test]
    fn test_ber_reader_indefinite_length() {
        let data = vec![0x30, 0x80, 0x00, 0x00];
        let mut reader = BerReader::new(&data);
        assert_eq!(reader.read_start_sequence().unwrap_err(), BerError::IndefiniteLength);
    }

    #[test]
    fn test_ber_reader_peek_on_empty() {
        let reader = BerReader::new(&[]);
        assert!(reader.peek_type().is_err());
        assert!(!reader.has_next_element());
    }

    #[test]
    fn test_ber_writer_integer_minimal_encoding() {
        let cases: &[(i64, &[u8])] = &[
            (0, &[0x02, 0x01, 0x00]),
            (127, &[0x02, 0x01, 0x7F]),
            (128, &[0x02, 0x02, 0x00, 0x80]),
            (256, &[0x02, 0x02, 0x01, 0x00]),
            (-1, &[0x02, 0x01, 0xFF]),
            (-128, &[0x02, 0x01, 0x80]),
            (-129, &[0x02, 0x02, 0xFF, 0x7F]),
        ];
        for (value, expected) in cases {
            let mut writer = BerWriter::new();
            writer.write_integer(UNIVERSAL_INTEGER_TYPE, *value);
            assert_eq!(writer.into_vec(), expected.to_vec(), "value {}", value);
        }
    }

    #[test]
    fn test_ber_writer_boolean() {
        let mut writer = BerWriter::new();
        writer.write_boolean(UNIVERSAL_BOOLEAN_TYPE, true);
        writer.write_boolean(UNIVERSAL_BOOLEAN_TYPE, false);
        assert_eq!(writer.into_vec(), vec![0x01, 0x01, 0xFF, 0x01, 0x01, 0x00]);
    }

    #[test]
    fn test_ber_writer_long_length() {
        let mut writer = BerWriter::new();
        writer.start_sequence(UNIVERSAL_SEQUENCE_TYPE);
        for _ in 0..200 {
            writer.write_string("test");
        }
        writer.end_sequence().unwrap();
        let result = writer.into_vec();
        // 200 * 6 = 1200 = 0x04B0
        assert_eq!(&result[..4], &[0x30, 0x82, 0x04, 0xB0]);
        assert_eq!(result.len(), 4 + 1200);

        let mut reader = BerReader::new(&result);
        reader.read_start_sequence().unwrap();
        let mut count = 0;
        while reader.has_next_element() {
            assert_eq!(reader.read_octet_string_as_string().unwrap(), "test");
            count += 1;
        }
        reader.read_end_sequence().unwrap();
        assert_eq!(count, 200);
    }

    #[test]
    fn test_ber_writer_nested_sequences() {
        let mut writer = BerWriter::new();
        writer.start_sequence(0x30);
        writer.write_integer(UNIVERSAL_INTEGER_TYPE, 7);
        writer.start_sequence(0x68);
        writer.write_string("dc=example");
        writer.end_sequence().unwrap();
        writer.end_sequence().unwrap();
        assert!(writer.end_sequence().is_err());
        let data = writer.into_vec();
        assert_eq!(data[0], 0x30);
        let mut reader = BerReader::new(&data);
        reader.read_start_sequence().unwrap();
        assert_eq!(reader.read_integer().unwrap(), 7);
        assert_eq!(reader.peek_type().unwrap(), 0x68);
        reader.read_start_sequence().unwrap();
        assert_eq!(reader.read_octet_string_as_string().unwrap(), "dc=example");
        reader.read_end_sequence().unwrap();
        reader.read_end_sequence().unwrap();
    }

    #[test]
    fn test_decode_length_forms() {
        assert_eq!(decode_length(&[0x30, 0x05], 1).unwrap(), (5, 1));
        assert_eq!(decode_length(&[0x30, 0x82, 0x01, 0x00], 1).unwrap(), (256, 3));
        assert_eq!(decode_length(&[0x30, 0x80], 1).unwrap_err(), BerError::IndefiniteLength);
        assert!(decode_length(&[0x30, 0x82, 0x01], 1).is_err());
    }
}
