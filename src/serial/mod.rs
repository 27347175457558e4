//! Portable binary persistence of component trees.
//!
//! Values are written with bincode using little-endian, fixed-width integers
//! so blobs written on one machine load on any other. Polymorphic slots are
//! written as a presence tag, the registry key and the component payload.

mod archive;

pub use archive::{InputArchive, OutputArchive};

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

use crate::core::errors::{LumenError, Result};

/// Magic bytes opening every tree stream
pub const MAGIC: [u8; 4] = *b"LMN1";

/// Current stream format version
pub const FORMAT_VERSION: u32 = 1;

pub(crate) fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_little_endian()
        .with_fixint_encoding()
}

/// Encode a plain value
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(options().serialize(value)?)
}

/// Decode a plain value written by [`encode`]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(options().deserialize(bytes)?)
}

/// Write the stream header
pub fn write_header<W: Write>(writer: &mut W) -> Result<()> {
    writer
        .write_all(&MAGIC)
        .and_then(|_| writer.write_all(&FORMAT_VERSION.to_le_bytes()))
        .map_err(|e| LumenError::io("write stream header", e))
}

/// Read and check the stream header
pub fn read_header<R: Read>(reader: &mut R) -> Result<u32> {
    let mut header = [0u8; 8];
    reader
        .read_exact(&mut header)
        .map_err(|e| LumenError::io("read stream header", e))?;
    if header[..4] != MAGIC {
        return Err(LumenError::protocol(format!(
            "not a lumen stream (magic {:?})",
            &header[..4]
        )));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FORMAT_VERSION {
        return Err(LumenError::protocol(format!(
            "unsupported stream version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixint_little_endian() {
        assert_eq!(encode(&1u32).unwrap(), vec![1, 0, 0, 0]);
        assert_eq!(encode(&0x0102u16).unwrap(), vec![2, 1]);
        // Strings are prefixed by a u64 length
        assert_eq!(encode("ab").unwrap(), vec![2, 0, 0, 0, 0, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_header() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(&buf[..4], b"LMN1");
        assert_eq!(read_header(&mut buf.as_slice()).unwrap(), FORMAT_VERSION);

        let mut bad = b"XXXX\x01\x00\x00\x00".as_slice();
        assert!(read_header(&mut bad).is_err());

        let mut future = b"LMN1\x09\x00\x00\x00".as_slice();
        assert!(read_header(&mut future).is_err());
    }
}
