//! Binary codec for the on-disk format.
//!
//! All multi-byte values are little-endian on the wire regardless of host
//! endianness. Strings are a `u64` byte length followed by UTF-8 bytes;
//! metadata values carry a one-byte variant tag; variable-length sections
//! are framed by a `u64` byte count so they can be skipped or parsed as
//! opaque buffers.
//!
//! Every decoding failure — short read, unknown tag, invalid UTF-8 — is
//! reported as [`OrionError::Corruption`] and fails the surrounding load.

use crate::error::{OrionError, Result};
use crate::metadata::MetadataValue;

/// Append-only encoder over a growable byte buffer.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// `u64` length prefix + raw UTF-8 bytes.
    pub(crate) fn put_string(&mut self, s: &str) {
        self.put_u64(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// One tag byte, then the variant payload.
    pub(crate) fn put_value(&mut self, value: &MetadataValue) {
        self.put_u8(value.tag());
        match value {
            MetadataValue::Int(v) => self.put_i64(*v),
            MetadataValue::Float(v) => self.put_f64(*v),
            MetadataValue::Str(v) => self.put_string(v),
        }
    }

    /// `u64` byte count, then the section bytes.
    pub(crate) fn put_framed(&mut self, section: &[u8]) {
        self.put_u64(section.len() as u64);
        self.buf.extend_from_slice(section);
    }
}

/// Bounds-checked cursor over a byte slice.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

fn truncated(what: &str) -> OrionError {
    OrionError::Corruption(format!("truncated stream while reading {what}"))
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(truncated(what));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn get_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    pub(crate) fn get_u32(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    pub(crate) fn get_u64(&mut self, what: &str) -> Result<u64> {
        let bytes = self.take(8, what)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    pub(crate) fn get_i64(&mut self, what: &str) -> Result<i64> {
        let bytes = self.take(8, what)?;
        Ok(i64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    pub(crate) fn get_f32(&mut self, what: &str) -> Result<f32> {
        let bytes = self.take(4, what)?;
        Ok(f32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    pub(crate) fn get_f64(&mut self, what: &str) -> Result<f64> {
        let bytes = self.take(8, what)?;
        Ok(f64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    /// Read a length-prefixed count that will be used to size an
    /// allocation, rejecting counts that cannot fit in the remaining
    /// bytes given a per-element minimum size.
    pub(crate) fn get_count(&mut self, min_elem_bytes: usize, what: &str) -> Result<usize> {
        let count = self.get_u64(what)?;
        let count = usize::try_from(count)
            .map_err(|_| OrionError::Corruption(format!("implausible {what} count: {count}")))?;
        if min_elem_bytes > 0 && count > self.remaining() / min_elem_bytes {
            return Err(OrionError::Corruption(format!(
                "{what} count {count} exceeds remaining stream"
            )));
        }
        Ok(count)
    }

    pub(crate) fn get_string(&mut self, what: &str) -> Result<String> {
        let len = self.get_count(1, what)?;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| OrionError::Corruption(format!("invalid UTF-8 in {what}")))
    }

    pub(crate) fn get_value(&mut self, what: &str) -> Result<MetadataValue> {
        let tag = self.get_u8(what)?;
        match tag {
            0 => Ok(MetadataValue::Int(self.get_i64(what)?)),
            1 => Ok(MetadataValue::Float(self.get_f64(what)?)),
            2 => Ok(MetadataValue::Str(self.get_string(what)?)),
            other => Err(OrionError::Corruption(format!(
                "unknown value tag {other} in {what}"
            ))),
        }
    }

    /// Read a `u64`-framed section and return it as an opaque sub-slice.
    pub(crate) fn get_framed(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.get_count(1, what)?;
        self.take(len, what)
    }

    /// Fail unless the stream was fully consumed.
    pub(crate) fn expect_end(&self, what: &str) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(OrionError::Corruption(format!(
                "{} trailing bytes after {what}",
                self.remaining()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let mut w = Writer::new();
        w.put_u8(7);
        w.put_u32(0xDEAD_BEEF);
        w.put_u64(u64::MAX - 1);
        w.put_i64(-42);
        w.put_f32(1.5);
        w.put_f64(-2.25);

        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_u8("t").unwrap(), 7);
        assert_eq!(r.get_u32("t").unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.get_u64("t").unwrap(), u64::MAX - 1);
        assert_eq!(r.get_i64("t").unwrap(), -42);
        assert_eq!(r.get_f32("t").unwrap(), 1.5);
        assert_eq!(r.get_f64("t").unwrap(), -2.25);
        assert!(r.is_empty());
    }

    #[test]
    fn test_wire_is_little_endian() {
        let mut w = Writer::new();
        w.put_u32(0x0102_0304);
        assert_eq!(w.into_bytes(), vec![0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut w = Writer::new();
        w.put_string("héllo");
        w.put_string("");
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_string("s").unwrap(), "héllo");
        assert_eq!(r.get_string("s").unwrap(), "");
    }

    #[test]
    fn test_value_roundtrip() {
        let values = vec![
            MetadataValue::Int(-7),
            MetadataValue::Float(3.25),
            MetadataValue::Str("tag".to_string()),
        ];
        let mut w = Writer::new();
        for v in &values {
            w.put_value(v);
        }
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        for v in &values {
            assert_eq!(&r.get_value("v").unwrap(), v);
        }
    }

    #[test]
    fn test_unknown_tag_is_corruption() {
        let bytes = [3u8];
        let mut r = Reader::new(&bytes);
        let err = r.get_value("v").unwrap_err();
        assert!(matches!(err, OrionError::Corruption(_)));
    }

    #[test]
    fn test_short_read_is_corruption() {
        let bytes = [1u8, 2, 3];
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            r.get_u64("field").unwrap_err(),
            OrionError::Corruption(_)
        ));
    }

    #[test]
    fn test_string_length_past_end_is_corruption() {
        let mut w = Writer::new();
        w.put_u64(100);
        w.put_bytes(b"short");
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            r.get_string("s").unwrap_err(),
            OrionError::Corruption(_)
        ));
    }

    #[test]
    fn test_framed_section() {
        let mut inner = Writer::new();
        inner.put_u32(9);
        let inner_bytes = inner.into_bytes();

        let mut w = Writer::new();
        w.put_framed(&inner_bytes);
        w.put_u8(0xFF);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        let section = r.get_framed("section").unwrap();
        assert_eq!(section, inner_bytes.as_slice());
        assert_eq!(r.get_u8("tail").unwrap(), 0xFF);
        r.expect_end("stream").unwrap();
    }

    #[test]
    fn test_expect_end_rejects_trailing() {
        let bytes = [0u8; 4];
        let mut r = Reader::new(&bytes);
        r.get_u8("b").unwrap();
        assert!(r.expect_end("stream").is_err());
    }
}
