//! Code-object serialization seam.
//!
//! The byte-code cache stores `(magic, mtime, payload)`; the two header
//! longs are read and written here as 32-bit little-endian words, and the
//! payload goes through a pluggable [`CodeCodec`]. The default codec wraps
//! bincode over the `CodeObject` struct.

use crate::error::{ImportError, Result};
use crate::value::CodeObject;
use std::io::{self, Cursor, Read, Write};

/// Write a 32-bit word, little-endian.
pub fn write_long(w: &mut dyn Write, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

/// Read a 32-bit word, little-endian.
pub fn read_long(r: &mut dyn Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Serialization of code objects to and from byte streams.
pub trait CodeCodec: Send + Sync {
    fn write_code(&self, w: &mut dyn Write, code: &CodeObject) -> io::Result<()>;

    /// Decode one code object from the stream. A payload that does not
    /// decode to a code object is a `TypeError`; callers remap the kind
    /// where their context demands a different one.
    fn read_code(&self, r: &mut dyn Read) -> Result<CodeObject>;
}

/// Default codec: bincode over the `CodeObject` struct.
pub struct BincodeCodec;

impl CodeCodec for BincodeCodec {
    fn write_code(&self, w: &mut dyn Write, code: &CodeObject) -> io::Result<()> {
        bincode::serialize_into(w, code).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn read_code(&self, r: &mut dyn Read) -> Result<CodeObject> {
        bincode::deserialize_from(r)
            .map_err(|e| ImportError::Type(format!("stream does not decode to a code object: {}", e)))
    }
}

/// Decode a code object from an in-memory byte slice (frozen modules).
pub fn read_code_from_bytes(codec: &dyn CodeCodec, bytes: &[u8]) -> Result<CodeObject> {
    codec.read_code(&mut Cursor::new(bytes))
}

/// Encode a code object to an in-memory buffer (frozen table construction).
pub fn write_code_to_bytes(codec: &dyn CodeCodec, code: &CodeObject) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    codec.write_code(&mut buf, code)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_roundtrip_is_little_endian() {
        let mut buf = Vec::new();
        write_long(&mut buf, 0x0A0D_4E47).unwrap();
        assert_eq!(buf, vec![0x47, 0x4E, 0x0D, 0x0A]);
        assert_eq!(read_long(&mut Cursor::new(&buf)).unwrap(), 0x0A0D_4E47);
    }

    #[test]
    fn test_read_long_short_stream_fails() {
        assert!(read_long(&mut Cursor::new(&[1u8, 2, 3])).is_err());
    }

    #[test]
    fn test_code_roundtrip() {
        let code = CodeObject::new("mod.py", vec![1, 2, 3, 4]);
        let bytes = write_code_to_bytes(&BincodeCodec, &code).unwrap();
        let back = read_code_from_bytes(&BincodeCodec, &bytes).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let garbage = vec![0xFF; 3];
        let err = read_code_from_bytes(&BincodeCodec, &garbage).unwrap_err();
        assert!(matches!(err, ImportError::Type(_)));
    }
}
