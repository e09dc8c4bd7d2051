//! Variable-length integer encoding utilities.
//!
//! Posting blocks store hash and doc-id deltas as unsigned LEB128 varints,
//! 7 bits per byte with a continuation bit. Small deltas dominate in sorted
//! posting streams, so most entries fit in one or two bytes.

use std::io::Write;

use crate::error::{FpIndexError, Result};

/// Append a u32 value to `out` using variable-length encoding.
pub fn encode_u32(value: u32, out: &mut Vec<u8>) {
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        out.push(byte);

        if val == 0 {
            break;
        }
    }
}

/// Decode a u32 value from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed. Truncated or overlong
/// input is reported as segment corruption, since varints only occur inside
/// posting blocks.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let mut result = 0u32;
    let mut shift = 0;
    let mut bytes_read = 0;

    for &byte in bytes {
        bytes_read += 1;

        if shift >= 32 {
            return Err(FpIndexError::corrupt_segment("varint overflow"));
        }

        result |= ((byte & 0x7F) as u32) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(FpIndexError::corrupt_segment("truncated varint"))
}

/// Write a variable-length encoded u32 to a writer, returning the byte count.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<usize> {
    let mut buf = Vec::with_capacity(5);
    encode_u32(value, &mut buf);
    writer.write_all(&buf)?;
    Ok(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u32::MAX];

        for &value in &test_values {
            let mut encoded = Vec::new();
            encode_u32(value, &mut encoded);
            let (decoded, bytes_read) = decode_u32(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
        }
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut encoded = Vec::new();
        encode_u32(300, &mut encoded);
        encoded.extend_from_slice(&[0xAA, 0xBB]);

        let (decoded, bytes_read) = decode_u32(&encoded).unwrap();
        assert_eq!(decoded, 300);
        assert_eq!(bytes_read, 2);
    }

    #[test]
    fn test_encoding_efficiency() {
        let len = |v: u32| {
            let mut buf = Vec::new();
            encode_u32(v, &mut buf);
            buf.len()
        };

        assert_eq!(len(0), 1);
        assert_eq!(len(127), 1);
        assert_eq!(len(128), 2);
        assert_eq!(len(16383), 2);
        assert_eq!(len(16384), 3);
        assert_eq!(len(u32::MAX), 5);
    }

    #[test]
    fn test_truncated_varint() {
        // Continuation bit set but no more data.
        assert!(decode_u32(&[0x80]).is_err());
        assert!(decode_u32(&[]).is_err());
    }

    #[test]
    fn test_overlong_varint() {
        let overlong = [0xFF; 10];
        assert!(decode_u32(&overlong).is_err());
    }

    #[test]
    fn test_write_to_writer() {
        let mut buffer = Vec::new();
        let written = write_u32(&mut buffer, 98765).unwrap();
        assert_eq!(written, buffer.len());

        let (decoded, _) = decode_u32(&buffer).unwrap();
        assert_eq!(decoded, 98765);
    }
}
