//! ASN.1 BER primitives for the Glow DTD.
//!
//! Only the subset EmBER actually uses: single-byte tags, definite
//! lengths, INTEGER, UTF8String and RELATIVE-OID. Indefinite lengths are
//! rejected; Lawo devices emit definite-length EmBER throughout.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BerError {
    #[error("Truncated element: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("Unsupported indefinite length at offset {offset}")]
    IndefiniteLength { offset: usize },
    #[error("Length of {len} bytes exceeds the frame")]
    LengthOverrun { len: usize },
    #[error("Integer of {len} bytes is wider than 8")]
    IntegerTooWide { len: usize },
    #[error("Invalid UTF-8 in string element")]
    InvalidUtf8,
    #[error("Relative OID subidentifier overflows u32")]
    OidOverflow,
}

// Universal tags.
pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_UTF8_STRING: u8 = 0x0C;
pub const TAG_RELATIVE_OID: u8 = 0x0D;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;

/// Context-specific constructed tag `[n]`.
pub const fn context(n: u8) -> u8 {
    0xA0 | n
}

/// Application-class constructed tag `[APPLICATION n]`.
pub const fn application(n: u8) -> u8 {
    0x60 | n
}

/// Append a TLV with the given tag and pre-encoded contents.
pub fn write_tlv(out: &mut Vec<u8>, tag: u8, contents: &[u8]) {
    out.push(tag);
    write_length(out, contents.len());
    out.extend_from_slice(contents);
}

fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

/// INTEGER contents: minimal two's complement, big-endian.
pub fn write_integer(out: &mut Vec<u8>, tag: u8, value: i64) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        // Drop a leading byte when it carries no information beyond the
        // sign bit of the byte that follows.
        let b = bytes[start];
        let next = bytes[start + 1];
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    write_tlv(out, tag, &bytes[start..]);
}

pub fn write_utf8(out: &mut Vec<u8>, tag: u8, s: &str) {
    write_tlv(out, tag, s.as_bytes());
}

/// RELATIVE-OID contents: base-128 subidentifiers, MSB continuation.
pub fn write_relative_oid(out: &mut Vec<u8>, tag: u8, path: &[u32]) {
    let mut contents = Vec::with_capacity(path.len() * 2);
    for &seg in path {
        let mut stack = [0u8; 5];
        let mut n = 0;
        let mut v = seg;
        loop {
            stack[n] = (v & 0x7F) as u8;
            n += 1;
            v >>= 7;
            if v == 0 {
                break;
            }
        }
        for i in (0..n).rev() {
            let b = stack[i] | if i > 0 { 0x80 } else { 0x00 };
            contents.push(b);
        }
    }
    write_tlv(out, tag, &contents);
}

/// Cursor over a single BER-encoded buffer.
pub struct BerReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Tag of the next element without consuming it.
    pub fn peek_tag(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Read one TLV header and return `(tag, contents)`.
    pub fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), BerError> {
        let tag = self.take(1)?[0];
        let len = self.read_length()?;
        let contents = self.take(len)?;
        Ok((tag, contents))
    }

    /// Skip the next element entirely.
    pub fn skip(&mut self) -> Result<(), BerError> {
        self.read_tlv().map(|_| ())
    }

    fn read_length(&mut self) -> Result<usize, BerError> {
        let first = self.take(1)?[0];
        if first < 0x80 {
            return Ok(first as usize);
        }
        if first == 0x80 {
            return Err(BerError::IndefiniteLength {
                offset: self.pos - 1,
            });
        }
        let n = (first & 0x7F) as usize;
        if n > 8 {
            return Err(BerError::LengthOverrun { len: n });
        }
        let bytes = self.take(n)?;
        let mut cursor = Cursor::new(bytes);
        let len = cursor
            .read_uint::<BigEndian>(n)
            .map_err(|_| BerError::LengthOverrun { len: n })? as usize;
        if len > self.buf.len() - self.pos {
            return Err(BerError::LengthOverrun { len });
        }
        Ok(len)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BerError> {
        if self.buf.len() - self.pos < n {
            return Err(BerError::Truncated {
                offset: self.pos,
                needed: n - (self.buf.len() - self.pos),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

/// Decode INTEGER contents (as produced by `read_tlv`).
pub fn decode_integer(contents: &[u8]) -> Result<i64, BerError> {
    if contents.is_empty() || contents.len() > 8 {
        return Err(BerError::IntegerTooWide {
            len: contents.len(),
        });
    }
    let mut value: i64 = if contents[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in contents {
        value = (value << 8) | b as i64;
    }
    Ok(value)
}

pub fn decode_utf8(contents: &[u8]) -> Result<String, BerError> {
    String::from_utf8(contents.to_vec()).map_err(|_| BerError::InvalidUtf8)
}

pub fn decode_relative_oid(contents: &[u8]) -> Result<Vec<u32>, BerError> {
    let mut path = Vec::new();
    let mut acc: u64 = 0;
    for &b in contents {
        acc = (acc << 7) | (b & 0x7F) as u64;
        if acc > u32::MAX as u64 {
            return Err(BerError::OidOverflow);
        }
        if b & 0x80 == 0 {
            path.push(acc as u32);
            acc = 0;
        }
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_roundtrip() {
        for value in [0i64, 1, 127, 128, 255, 256, -1, -128, 65535, 1 << 31] {
            let mut buf = Vec::new();
            write_integer(&mut buf, TAG_INTEGER, value);
            let mut reader = BerReader::new(&buf);
            let (tag, contents) = reader.read_tlv().unwrap();
            assert_eq!(tag, TAG_INTEGER);
            assert_eq!(decode_integer(contents).unwrap(), value, "value {value}");
        }
    }

    #[test]
    fn test_integer_minimal_encoding() {
        let mut buf = Vec::new();
        write_integer(&mut buf, TAG_INTEGER, 32);
        assert_eq!(buf, [0x02, 0x01, 0x20]);

        let mut buf = Vec::new();
        write_integer(&mut buf, TAG_INTEGER, 128);
        // 0x80 alone would read as negative, so a leading zero stays.
        assert_eq!(buf, [0x02, 0x02, 0x00, 0x80]);
    }

    #[test]
    fn test_long_form_length() {
        let contents = vec![0xAB; 300];
        let mut buf = Vec::new();
        write_tlv(&mut buf, TAG_UTF8_STRING, &contents);
        assert_eq!(&buf[..4], &[0x0C, 0x82, 0x01, 0x2C]);

        let mut reader = BerReader::new(&buf);
        let (_, decoded) = reader.read_tlv().unwrap();
        assert_eq!(decoded.len(), 300);
    }

    #[test]
    fn test_relative_oid_roundtrip() {
        let path = vec![1, 10, 1, 1, 3, 200, 70000];
        let mut buf = Vec::new();
        write_relative_oid(&mut buf, TAG_RELATIVE_OID, &path);
        let mut reader = BerReader::new(&buf);
        let (tag, contents) = reader.read_tlv().unwrap();
        assert_eq!(tag, TAG_RELATIVE_OID);
        assert_eq!(decode_relative_oid(contents).unwrap(), path);
    }

    #[test]
    fn test_truncated_element() {
        let buf = [0x02, 0x04, 0x00];
        let mut reader = BerReader::new(&buf);
        assert!(matches!(
            reader.read_tlv(),
            Err(BerError::Truncated { .. })
        ));
    }

    #[test]
    fn test_indefinite_length_rejected() {
        let buf = [0x30, 0x80, 0x00, 0x00];
        let mut reader = BerReader::new(&buf);
        assert!(matches!(
            reader.read_tlv(),
            Err(BerError::IndefiniteLength { .. })
        ));
    }
}
